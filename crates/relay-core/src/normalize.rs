//! Event normalization
//!
//! Turns a raw Event Grid delivery into a [`Delivery`], and a blob event into
//! a [`SourceObject`]. Subjects and sources have a fixed positional layout:
//!
//! ```text
//! subject: /blobServices/{service}/containers/{container}/blobs/{key...}
//! source:  /subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/storageAccounts/{account}
//! ```
//!
//! Anything else is rejected; no best-effort guesses.

use crate::error::{RelayError, Result};
use crate::message::{CloudEvent, Delivery, ValidationEvent, SUBSCRIPTION_VALIDATION};
use crate::route::{AzureBlobObject, AzureBlobSourceObject, AzureBlobStorageEvent, SourceObject};
use serde_json::Value;

const SUBJECT_MIN_SEGMENTS: usize = 6;
const SOURCE_SEGMENTS: usize = 9;

/// Decode a POST body, checking the event type header before the schema.
///
/// A notification must be a JSON object; every CloudEvent field is optional,
/// so the object check is what rejects arrays and scalars.
pub fn decode_delivery(event_type: Option<&str>, body: &[u8]) -> Result<Delivery> {
    if event_type == Some(SUBSCRIPTION_VALIDATION) {
        let events: Vec<ValidationEvent> = serde_json::from_slice(body)
            .map_err(|e| invalid_body("invalid subscription validation body", e))?;
        return Ok(Delivery::SubscriptionValidation(events));
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| invalid_body("invalid CloudEvent body", e))?;
    let Value::Object(mut fields) = value else {
        return Err(RelayError::Serialization {
            message: "CloudEvent body is not a JSON object".to_string(),
            source: None,
        });
    };
    if fields.get("data").is_some_and(Value::is_null) {
        fields.remove("data");
    }
    if fields.get("data").is_some_and(|data| !data.is_object()) {
        return Err(RelayError::Serialization {
            message: "CloudEvent data is not a JSON object".to_string(),
            source: None,
        });
    }

    let event: CloudEvent = serde_json::from_value(Value::Object(fields))
        .map_err(|e| invalid_body("invalid CloudEvent body", e))?;
    Ok(Delivery::Notification(event))
}

fn invalid_body(message: &str, e: serde_json::Error) -> RelayError {
    RelayError::Serialization {
        message: format!("{}: {}", message, e),
        source: Some(Box::new(e)),
    }
}

/// Container and blob key extracted from an event subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSubject {
    pub container: String,
    pub blob_name: String,
}

/// Parse `/blobServices/{service}/containers/{container}/blobs/{key...}`
pub fn parse_subject(subject: &str) -> Result<BlobSubject> {
    let parts: Vec<&str> = subject.split('/').collect();
    if parts.len() < SUBJECT_MIN_SEGMENTS {
        return Err(RelayError::parse("too few subject segments", "subject", subject));
    }
    if parts[1] != "blobServices" || parts[3] != "containers" || parts[5] != "blobs" {
        return Err(RelayError::parse("unexpected subject layout", "subject", subject));
    }

    Ok(BlobSubject {
        container: parts[4].to_string(),
        blob_name: parts[6..].join("/"),
    })
}

/// Parse the storage account name out of the event source
pub fn parse_source(source: &str) -> Result<String> {
    let parts: Vec<&str> = source.split('/').collect();
    if parts.len() != SOURCE_SEGMENTS {
        return Err(RelayError::parse("wrong number of source segments", "source", source));
    }
    if parts[1] != "subscriptions"
        || parts[3] != "resourceGroups"
        || parts[5] != "providers"
        || parts[7] != "storageAccounts"
    {
        return Err(RelayError::parse("unexpected source layout", "source", source));
    }

    Ok(parts[8].to_string())
}

/// Build the source object for a blob event
pub fn normalize(event: &CloudEvent) -> Result<SourceObject> {
    let subject = parse_subject(&event.subject)?;
    let storage_account = parse_source(&event.source)?;

    Ok(SourceObject::AzureBlobStorage(AzureBlobStorageEvent {
        event: event.clone(),
        object: AzureBlobSourceObject {
            location: AzureBlobObject {
                storage_account,
                container: subject.container,
                blob_name: subject.blob_name,
            },
            content_length: event.data.content_length,
            content_type: event.data.content_type.clone(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::ObjectLocation;

    const SOURCE: &str =
        "/subscriptions/S/resourceGroups/G/providers/Microsoft.Storage/storageAccounts/acct";

    fn event(subject: &str, source: &str) -> CloudEvent {
        CloudEvent {
            subject: subject.to_string(),
            source: source.to_string(),
            event_type: crate::message::BLOB_CREATED.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_scenario() {
        let ev = event("/blobServices/default/containers/logs/blobs/a/b/c.json", SOURCE);
        let source = normalize(&ev).unwrap();

        match source.location() {
            ObjectLocation::Azure(o) => {
                assert_eq!(o.storage_account, "acct");
                assert_eq!(o.container, "logs");
                assert_eq!(o.blob_name, "a/b/c.json");
            }
            other => panic!("Expected Azure location, got {other:?}"),
        }
    }

    #[test]
    fn test_subject_variants() {
        let cases = [
            ("/blobServices/default/containers/c/blobs/k", Some(("c", "k"))),
            ("/blobServices/default/containers/c/blobs/", Some(("c", ""))),
            ("/blobServices/default/containers/c/blobs", Some(("c", ""))),
            ("/blobServices/x/containers/c/blobs/a//b", Some(("c", "a//b"))),
            ("/blobServices/default/containers/c", None),
            ("", None),
            ("/blobservices/default/containers/c/blobs/k", None),
            ("/blobServices/default/container/c/blobs/k", None),
            ("/blobServices/default/containers/c/blob/k", None),
            ("blobServices/default/containers/c/blobs/k", None),
        ];

        for (subject, expected) in cases {
            let result = parse_subject(subject);
            match expected {
                Some((container, key)) => {
                    let parsed = result.unwrap_or_else(|e| panic!("{subject}: {e}"));
                    assert_eq!(parsed.container, container, "{subject}");
                    assert_eq!(parsed.blob_name, key, "{subject}");
                }
                None => assert!(
                    matches!(result, Err(RelayError::Parse { field: "subject", .. })),
                    "{subject} should be rejected"
                ),
            }
        }
    }

    #[test]
    fn test_source_variants() {
        assert_eq!(parse_source(SOURCE).unwrap(), "acct");

        let rejected = [
            "/subscriptions/S/resourceGroups/G/providers/Microsoft.Storage/storageAccounts",
            "/subscriptions/S/resourceGroups/G/providers/Microsoft.Storage/storageAccounts/acct/extra",
            "/subscription/S/resourceGroups/G/providers/Microsoft.Storage/storageAccounts/acct",
            "/subscriptions/S/resourcegroups/G/providers/Microsoft.Storage/storageAccounts/acct",
            "/subscriptions/S/resourceGroups/G/provider/Microsoft.Storage/storageAccounts/acct",
            "/subscriptions/S/resourceGroups/G/providers/Microsoft.Storage/accounts/acct",
            "",
        ];
        for source in rejected {
            assert!(
                matches!(parse_source(source), Err(RelayError::Parse { field: "source", .. })),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn test_bad_source_produces_no_object() {
        let ev = event(
            "/blobServices/default/containers/logs/blobs/a.json",
            "/subscriptions/S/resourceGroups/G",
        );
        assert!(normalize(&ev).is_err());
    }

    #[test]
    fn test_decode_validation_checks_header_first() {
        let body = br#"[{"data": {"validationCode": "abc"}}]"#;

        match decode_delivery(Some(SUBSCRIPTION_VALIDATION), body).unwrap() {
            Delivery::SubscriptionValidation(events) => {
                assert_eq!(events[0].data.validation_code.as_deref(), Some("abc"))
            }
            other => panic!("Expected validation, got {other:?}"),
        }

        // Same body without the header is not a CloudEvent object
        assert!(decode_delivery(None, body).is_err());
    }

    #[test]
    fn test_decode_notification() {
        let body = format!(
            r#"{{"subject": "/blobServices/default/containers/logs/blobs/a", "source": "{}", "type": "Microsoft.Storage.BlobDeleted"}}"#,
            SOURCE
        );
        match decode_delivery(Some("Notification"), body.as_bytes()).unwrap() {
            Delivery::Notification(ev) => assert!(!ev.is_blob_created()),
            other => panic!("Expected notification, got {other:?}"),
        }

        assert!(matches!(
            decode_delivery(None, b"not json"),
            Err(RelayError::Serialization { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_object_notifications() {
        let bodies: [&[u8]; 6] = [
            b"[]",
            br#"[{"data": {"validationCode": "abc"}}]"#,
            b"null",
            b"42",
            br#""Microsoft.Storage.BlobCreated""#,
            br#"{"type": "Microsoft.Storage.BlobCreated", "data": ["a", "b"]}"#,
        ];
        for body in bodies {
            assert!(
                matches!(
                    decode_delivery(Some("Notification"), body),
                    Err(RelayError::Serialization { .. })
                ),
                "{} should be rejected",
                String::from_utf8_lossy(body)
            );
        }
    }
}
