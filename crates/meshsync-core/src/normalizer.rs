//! Raw event → [`NormalizedRecord`].
//!
//! Every supported kind carries a standard `metadata` block, so the
//! identity fields are read through `ObjectMeta` instead of per-kind code.

use cluster_source::{RawEvent, ResourceKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::domain::{NormalizeError, NormalizedRecord, ResourceVersion};

/// Turn one raw event into a record.
///
/// The payload keeps the whole object except `metadata.managedFields`, and
/// `apiVersion`/`kind` are filled in when the source left them out.
pub fn normalize(event: RawEvent) -> Result<NormalizedRecord, NormalizeError> {
    let RawEvent {
        operation,
        kind,
        payload,
    } = event;

    let Value::Object(mut object) = payload else {
        return Err(NormalizeError::NotAnObject { kind });
    };

    if let Some(actual) = object.get("kind").and_then(Value::as_str) {
        if actual != kind.api_kind() {
            return Err(NormalizeError::KindMismatch {
                expected: kind,
                actual: actual.to_string(),
            });
        }
    }

    let metadata = object
        .get_mut("metadata")
        .ok_or(NormalizeError::MissingMetadata { kind })?;
    if let Value::Object(fields) = metadata {
        fields.remove("managedFields");
    }
    let meta: ObjectMeta =
        serde_json::from_value(metadata.clone()).map_err(|e| NormalizeError::InvalidMetadata {
            kind,
            message: e.to_string(),
        })?;

    let name = required(kind, "name", meta.name)?;
    let uid = required(kind, "uid", meta.uid)?;
    let resource_version = required(kind, "resourceVersion", meta.resource_version)?;
    let namespace = if kind.is_namespaced() {
        meta.namespace.filter(|ns| !ns.is_empty())
    } else {
        None
    };

    object
        .entry("apiVersion")
        .or_insert_with(|| Value::String(kind.api_version()));
    object
        .entry("kind")
        .or_insert_with(|| Value::String(kind.api_kind().to_string()));

    Ok(NormalizedRecord {
        kind,
        namespace,
        name,
        uid,
        resource_version: ResourceVersion::new(resource_version),
        operation,
        payload: Value::Object(object),
    })
}

fn required(
    kind: ResourceKind,
    field: &'static str,
    value: Option<String>,
) -> Result<String, NormalizeError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(NormalizeError::MissingField { kind, field }),
    }
}
