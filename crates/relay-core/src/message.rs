//! Wire types for Event Grid deliveries
//!
//! Field names follow the provider's CloudEvents schema exactly; they are
//! renamed to Rust conventions only on the Rust side.

use serde::{Deserialize, Serialize};

/// Event type announcing a newly written blob
pub const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";

/// Value of the `aeg-event-type` header on subscription validation requests
pub const SUBSCRIPTION_VALIDATION: &str = "SubscriptionValidation";

/// Azure Event Grid event in CloudEvents 1.0 schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEvent {
    #[serde(default)]
    pub data: BlobEventData,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "specversion", default)]
    pub spec_version: String,
    #[serde(default)]
    pub subject: String,
    /// Raw timestamp as sent by the provider
    #[serde(default)]
    pub time: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
}

impl CloudEvent {
    /// Whether this event should be routed
    pub fn is_blob_created(&self) -> bool {
        self.event_type == BLOB_CREATED
    }
}

/// `data` payload of a blob storage event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEventData {
    #[serde(default)]
    pub api: String,
    #[serde(default)]
    pub blob_type: String,
    #[serde(default)]
    pub client_request_id: String,
    #[serde(default)]
    pub content_length: i64,
    #[serde(default)]
    pub content_type: String,
    #[serde(rename = "eTag", default)]
    pub e_tag: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub sequencer: String,
    #[serde(default)]
    pub storage_diagnostics: StorageDiagnostics,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDiagnostics {
    #[serde(default)]
    pub batch_id: String,
}

/// Event Grid subscription validation event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub data: ValidationData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_url: Option<String>,
}

/// Synchronous handshake answer for validation events without a callback URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    #[serde(rename = "validationResponse")]
    pub validation_response: String,
}

/// A decoded POST delivery
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Handshake control message; never routed
    SubscriptionValidation(Vec<ValidationEvent>),
    /// Regular change notification
    Notification(CloudEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB_CREATED_EVENT: &str = r#"{
        "source": "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/logstore",
        "subject": "/blobServices/default/containers/audit-logs/blobs/y=2024/m=08/d=25/PT1H.json",
        "type": "Microsoft.Storage.BlobCreated",
        "time": "2024-08-25T23:16:11.8746191Z",
        "id": "831e1650-001e-001b-66ab-eeb76e069631",
        "data": {
            "api": "PutBlockList",
            "clientRequestId": "6d79dbfb-0e37-4fc4-981f-442c9ca65760",
            "requestId": "831e1650-001e-001b-66ab-eeb76e000000",
            "eTag": "0x8D4BCC2E4835CD0",
            "contentType": "application/json",
            "contentLength": 524288,
            "blobType": "BlockBlob",
            "url": "https://logstore.blob.core.windows.net/audit-logs/y=2024/m=08/d=25/PT1H.json",
            "sequencer": "00000000000004420000000000028963",
            "storageDiagnostics": {"batchId": "b68529f3-68cd-4744-baa4-3c0498ec19f0"}
        },
        "specversion": "1.0"
    }"#;

    #[test]
    fn test_cloud_event_field_names() {
        let ev: CloudEvent = serde_json::from_str(BLOB_CREATED_EVENT).unwrap();

        assert!(ev.is_blob_created());
        assert_eq!(ev.spec_version, "1.0");
        assert_eq!(ev.data.content_length, 524288);
        assert_eq!(ev.data.content_type, "application/json");
        assert_eq!(ev.data.e_tag, "0x8D4BCC2E4835CD0");
        assert_eq!(ev.data.blob_type, "BlockBlob");
        assert_eq!(ev.data.api, "PutBlockList");
        assert_eq!(ev.data.sequencer, "00000000000004420000000000028963");
        assert_eq!(
            ev.data.storage_diagnostics.batch_id,
            "b68529f3-68cd-4744-baa4-3c0498ec19f0"
        );

        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["type"], BLOB_CREATED);
        assert_eq!(value["data"]["eTag"], "0x8D4BCC2E4835CD0");
        assert_eq!(value["data"]["contentLength"], 524288);
    }

    #[test]
    fn test_validation_event() {
        let body = r#"[{
            "id": "2d1781af-3a4c-4d7c-bd0c-e34b19da4e66",
            "topic": "/subscriptions/xx/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/logstore",
            "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
            "data": {
                "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6",
                "validationUrl": "https://rp-eastus2.eventgrid.azure.net:553/eventsubscriptions/x/validate?id=1"
            }
        }]"#;
        let events: Vec<ValidationEvent> = serde_json::from_str(body).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].data.validation_code.as_deref(),
            Some("512d38b6-c7b8-40c8-89fe-f46f9e9622b6")
        );
        assert!(events[0].data.validation_url.is_some());
    }
}
