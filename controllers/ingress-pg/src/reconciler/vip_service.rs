//! VIP service records and their cross-cluster owner references.
//!
//! A record in the tailnet directory is shared by every operator that serves
//! the same Service Name. Each operator only ever adds or removes its own
//! `operatorID` from the owner annotation; the record is deleted when the
//! last owner releases it.

use super::Reconciler;
use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tailnet_client::VipService;
use tracing::{debug, info};

/// Annotation on the VIP service record holding the owner list.
pub const OWNER_ANNOTATION: &str = "tailscale.com/owner-references";

pub const VIP_COMMENT: &str = "This VIP service is managed by the Tailscale Kubernetes Operator, do not modify";

/// Decoded value of `OWNER_ANNOTATION`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OwnerAnnotationValue {
    #[serde(rename = "ownerRefs", alias = "ownerrefs", default)]
    pub owner_refs: Vec<OwnerRef>,
}

/// One operator's claim on a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OwnerRef {
    #[serde(rename = "operatorID", default, skip_serializing_if = "String::is_empty")]
    pub operator_id: String,

    /// Fields written by other operator versions
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OwnerAnnotationValue {
    pub fn contains(&self, operator_id: &str) -> bool {
        self.owner_refs.iter().any(|r| r.operator_id == operator_id)
    }

    pub fn operator_ids(&self) -> Vec<&str> {
        self.owner_refs.iter().map(|r| r.operator_id.as_str()).collect()
    }
}

/// Owner list of `svc`; `None` when the record has no owner annotation.
pub fn parse_owner_annotation(svc: &VipService) -> Result<Option<OwnerAnnotationValue>, ControllerError> {
    match svc.annotations.get(OWNER_ANNOTATION) {
        Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(raw)?)),
        _ => Ok(None),
    }
}

/// Advertised ports: 443 always, 80 when the HTTP endpoint is enabled.
pub fn vip_ports(http_endpoint: bool) -> Vec<String> {
    let mut ports = vec!["tcp:443".to_string()];
    if http_endpoint {
        ports.push("tcp:80".to_string());
    }
    ports
}

fn with_owners(svc: &VipService, owners: &OwnerAnnotationValue) -> Result<VipService, ControllerError> {
    let mut updated = svc.clone();
    updated
        .annotations
        .insert(OWNER_ANNOTATION.to_string(), serde_json::to_string(owners)?);
    Ok(updated)
}

impl Reconciler {
    /// Read a record; `None` when the directory has none.
    pub(crate) async fn get_vip_service(&self, name: &str) -> Result<Option<VipService>, ControllerError> {
        match self.bounded("get VIP service", self.tailnet.get_vip_service(name)).await {
            Ok(svc) => Ok(Some(svc)),
            Err(ControllerError::Tailnet(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Claim `name` for this operator with the given serving attributes.
    ///
    /// Tags and ports are replaced, other operators' owner references are kept.
    /// Returns whether a write happened.
    pub(crate) async fn upsert_vip_service(
        &self,
        name: &str,
        tags: &[String],
        ports: &[String],
    ) -> Result<bool, ControllerError> {
        let operator_id = &self.config.operator_id;
        let existing = self.get_vip_service(name).await?;

        let (base, mut owners) = match existing.as_ref() {
            Some(svc) => match parse_owner_annotation(svc)? {
                Some(owners) => (svc.clone(), owners),
                None => {
                    return Err(ControllerError::Validation(format!(
                        "VIP service {} exists and is not owned by an operator",
                        name
                    )))
                }
            },
            None => (
                VipService {
                    name: name.to_string(),
                    ..Default::default()
                },
                OwnerAnnotationValue::default(),
            ),
        };

        if !owners.contains(operator_id) {
            owners.owner_refs.push(OwnerRef {
                operator_id: operator_id.clone(),
                extra: BTreeMap::new(),
            });
        }
        let mut desired = with_owners(&base, &owners)?;
        desired.comment = VIP_COMMENT.to_string();
        desired.tags = tags.to_vec();
        desired.ports = ports.to_vec();

        if existing.as_ref() == Some(&desired) {
            debug!("VIP service {} already up-to-date", name);
            return Ok(false);
        }

        self.bounded("write VIP service", self.tailnet.create_or_update_vip_service(&desired))
            .await?;
        info!(
            "{} VIP service {} with tags {:?} and ports {:?}, owners {:?}",
            if existing.is_some() { "Updated" } else { "Created" },
            name,
            tags,
            ports,
            owners.operator_ids()
        );

        // The directory has no version field: confirm our claim survived.
        let written = self.get_vip_service(name).await?;
        let claimed = match written.as_ref() {
            Some(svc) => parse_owner_annotation(svc)?.is_some_and(|o| o.contains(operator_id)),
            None => false,
        };
        if !claimed {
            return Err(ControllerError::Conflict(format!(
                "owner reference {} on VIP service {} was overwritten by a concurrent writer",
                operator_id, name
            )));
        }
        Ok(true)
    }

    /// Drop this operator's claim on `name`, deleting the record when no
    /// owner is left. Returns whether a write happened.
    pub(crate) async fn release_vip_service(&self, name: &str) -> Result<bool, ControllerError> {
        let operator_id = &self.config.operator_id;
        let Some(svc) = self.get_vip_service(name).await? else {
            debug!("VIP service {} already absent", name);
            return Ok(false);
        };
        let Some(mut owners) = parse_owner_annotation(&svc)? else {
            debug!("VIP service {} is not operator-owned, leaving it alone", name);
            return Ok(false);
        };
        if !owners.contains(operator_id) {
            debug!("VIP service {} holds no owner reference for {}", name, operator_id);
            return Ok(false);
        }

        owners.owner_refs.retain(|r| r.operator_id != *operator_id);
        if owners.owner_refs.is_empty() {
            self.bounded("delete VIP service", self.tailnet.delete_vip_service(name))
                .await?;
            info!("Deleted VIP service {}, no owners left", name);
        } else {
            let updated = with_owners(&svc, &owners)?;
            self.bounded("write VIP service", self.tailnet.create_or_update_vip_service(&updated))
                .await?;
            info!(
                "Released VIP service {} for {}, remaining owners {:?}",
                name,
                operator_id,
                owners.operator_ids()
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(annotation: Option<&str>) -> VipService {
        let mut svc = VipService {
            name: "svc:my-svc".to_string(),
            ..Default::default()
        };
        if let Some(raw) = annotation {
            svc.annotations.insert(OWNER_ANNOTATION.to_string(), raw.to_string());
        }
        svc
    }

    #[test]
    fn test_owner_annotation_decodes() {
        let svc = record(Some(r#"{"ownerRefs":[{"operatorID":"operator-2"},{"operatorID":"operator-1"}]}"#));
        let owners = parse_owner_annotation(&svc).unwrap().expect("annotation present");
        assert_eq!(owners.operator_ids(), vec!["operator-2", "operator-1"]);
        assert!(owners.contains("operator-1"));
        assert!(!owners.contains("operator-3"));
    }

    #[test]
    fn test_lowercase_key_is_accepted() {
        let svc = record(Some(r#"{"ownerrefs":[{"operatorID":"operator-1"}]}"#));
        let owners = parse_owner_annotation(&svc).unwrap().expect("annotation present");
        assert!(owners.contains("operator-1"));
    }

    #[test]
    fn test_unknown_owner_fields_survive() {
        let svc = record(Some(r#"{"ownerRefs":[{"operatorID":"operator-1","resource":{"kind":"Service"}}]}"#));
        let owners = parse_owner_annotation(&svc).unwrap().expect("annotation present");
        let encoded = serde_json::to_value(&owners).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({"ownerRefs": [{"operatorID": "operator-1", "resource": {"kind": "Service"}}]})
        );
    }

    #[test]
    fn test_missing_annotation() {
        assert!(parse_owner_annotation(&record(None)).unwrap().is_none());
        assert!(parse_owner_annotation(&record(Some("not json"))).is_err());
    }

    #[test]
    fn test_vip_ports() {
        assert_eq!(vip_ports(false), vec!["tcp:443"]);
        assert_eq!(vip_ports(true), vec!["tcp:443", "tcp:80"]);
    }
}
