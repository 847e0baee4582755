//! SendLocalList handler

use std::sync::Arc;

use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::types::{UpdateStatus, UpdateType};
use serde_json::Value;
use tracing::{info, warn};

use crate::storage::LocalListEntry;
use crate::support::errors::CallErrorCode;

use super::{parse_payload, Dispatcher};

pub async fn handle(
    dispatcher: &Arc<Dispatcher>,
    payload: &Value,
) -> Result<Value, (CallErrorCode, String)> {
    let req: SendLocalListRequest = parse_payload(payload)?;

    info!(
        list_version = req.list_version,
        update_type = ?req.update_type,
        entries = req.local_authorization_list.as_ref().map_or(0, Vec::len),
        "SendLocalList"
    );

    let respond = |status: UpdateStatus| {
        let response = SendLocalListResponse { status };
        Ok(serde_json::to_value(&response).unwrap_or_default())
    };

    if !dispatcher.device_model.local_auth_list_enabled() {
        return respond(UpdateStatus::NotSupported);
    }

    let entries: Vec<LocalListEntry> = req
        .local_authorization_list
        .unwrap_or_default()
        .into_iter()
        .map(|data| LocalListEntry {
            id_tag: data.id_tag,
            info: data.id_tag_info,
        })
        .collect();

    if entries.len() > dispatcher.device_model.send_local_list_max_length() {
        return respond(UpdateStatus::Failed);
    }

    let full_update = req.update_type == UpdateType::Full;
    let current = dispatcher.storage.local_list_version().await.unwrap_or(0);

    // a differential update must move the version strictly forward
    if !full_update && req.list_version <= current {
        return respond(UpdateStatus::VersionMismatch);
    }

    if !full_update {
        let size = dispatcher.storage.local_list_size().await.unwrap_or(0);
        if size + entries.len() > dispatcher.device_model.local_auth_list_max_length() {
            return respond(UpdateStatus::Failed);
        }
    }

    match dispatcher
        .storage
        .apply_local_list(req.list_version, &entries, full_update)
        .await
    {
        Ok(()) => respond(UpdateStatus::Accepted),
        Err(e) => {
            warn!(error = %e, "Failed to apply local list");
            respond(UpdateStatus::Failed)
        }
    }
}
