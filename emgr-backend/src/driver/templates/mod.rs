//! Vendor payload builders.
//!
//! Each (vendor, service) pair has one [`MessageBuilder`] strategy, selected
//! through the [`BuilderRegistry`] lookup table. Builders turn an EC message
//! plus the device's recorded state into the XML sent with `edit-config`.

pub mod cisco;
pub mod juniper;

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::debug;

use emgr_shared::em_config::{DeviceInfo, Vendor};
use emgr_shared::{EcMessage, EmInfoRow, OrderType};

/// Service names with built-in builders
pub const SERVICE_L2_SLICE: &str = "l2-slice";
pub const SERVICE_L3_SLICE: &str = "l3-slice";

/// Payload generation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Invalid service parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("VLAN {vlan_id} of slice '{slice_id}' is not configured on '{device}'")]
    NotConfigured {
        device: String,
        slice_id: String,
        vlan_id: u16,
    },

    #[error("Order type '{order_type}' has no configuration payload")]
    UnsupportedOrder { order_type: String },

    #[error("No builder registered for {vendor} service '{service}'")]
    NoBuilder { vendor: Vendor, service: String },
}

/// Fixed inputs of a build: who the payload is for and what the order does
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub device: DeviceInfo,
    pub order_type: OrderType,
}

/// Configuration already applied to the device, as recorded by the EM
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub applied: Vec<EmInfoRow>,
}

impl DeviceState {
    pub fn new(applied: Vec<EmInfoRow>) -> Self {
        Self { applied }
    }

    pub fn has_vlan(&self, slice_id: &str, vlan_id: u16) -> bool {
        self.applied
            .iter()
            .any(|row| row.slice_id == slice_id && row.vlan_id == vlan_id)
    }
}

/// Slice parameters common to the L2 and L3 services
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SliceParams {
    pub slice_id: String,
    pub vlan_id: u16,
    /// Physical port the sub-interface lives on
    #[serde(alias = "port")]
    pub interface: String,
    #[serde(default)]
    pub description: Option<String>,
    /// L3 only: address in CIDR notation
    #[serde(default)]
    pub address: Option<String>,
    /// L3 only: routing instance
    #[serde(default)]
    pub vrf: Option<String>,
}

impl SliceParams {
    pub fn from_message(message: &EcMessage) -> Result<Self, BuildError> {
        let params: SliceParams =
            serde_json::from_value(message.body.clone()).map_err(|e| BuildError::InvalidParameters {
                reason: e.to_string(),
            })?;

        if params.slice_id.is_empty() {
            return Err(BuildError::InvalidParameters {
                reason: "slice_id is empty".to_string(),
            });
        }
        if params.vlan_id == 0 || params.vlan_id > 4094 {
            return Err(BuildError::InvalidParameters {
                reason: format!("vlan_id {} outside 1-4094", params.vlan_id),
            });
        }
        if params.interface.is_empty() {
            return Err(BuildError::InvalidParameters {
                reason: "interface is empty".to_string(),
            });
        }
        Ok(params)
    }

    /// L3 builders need an address
    pub fn require_address(&self) -> Result<&str, BuildError> {
        self.address
            .as_deref()
            .filter(|a| a.contains('/'))
            .ok_or_else(|| BuildError::InvalidParameters {
                reason: "l3 slice needs an address in CIDR notation".to_string(),
            })
    }

    pub fn description_or_default(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("emgr slice {}", self.slice_id))
    }
}

/// Shared checks every builder runs before rendering
pub fn prepare(
    ctx: &BuildContext,
    message: &EcMessage,
    state: &DeviceState,
) -> Result<SliceParams, BuildError> {
    if ctx.order_type == OrderType::Get {
        return Err(BuildError::UnsupportedOrder {
            order_type: ctx.order_type.as_str().to_string(),
        });
    }

    let params = SliceParams::from_message(message)?;
    if ctx.order_type == OrderType::Delete && !state.has_vlan(&params.slice_id, params.vlan_id) {
        return Err(BuildError::NotConfigured {
            device: ctx.device.name.clone(),
            slice_id: params.slice_id,
            vlan_id: params.vlan_id,
        });
    }
    Ok(params)
}

/// Strategy producing the edit-config payload for one (vendor, service) pair
pub trait MessageBuilder: Send + Sync {
    fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError>;
}

/// Lookup table of builders keyed by vendor and service
pub struct BuilderRegistry {
    builders: HashMap<(Vendor, String), Box<dyn MessageBuilder>>,
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BuilderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Cisco and Juniper builders for the L2 and L3 slice services
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Vendor::Cisco, SERVICE_L2_SLICE, Box::new(cisco::CiscoL2Slice));
        registry.register(Vendor::Cisco, SERVICE_L3_SLICE, Box::new(cisco::CiscoL3Slice));
        registry.register(Vendor::Juniper, SERVICE_L2_SLICE, Box::new(juniper::JuniperL2Slice));
        registry.register(Vendor::Juniper, SERVICE_L3_SLICE, Box::new(juniper::JuniperL3Slice));
        registry
    }

    pub fn register(&mut self, vendor: Vendor, service: &str, builder: Box<dyn MessageBuilder>) {
        debug!("Registering payload builder for {} {}", vendor, service);
        self.builders.insert((vendor, service.to_string()), builder);
    }

    pub fn supports(&self, vendor: Vendor, service: &str) -> bool {
        self.builders.contains_key(&(vendor, service.to_string()))
    }

    pub fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError> {
        let vendor = ctx.device.vendor;
        let builder = self
            .builders
            .get(&(vendor, message.service.clone()))
            .ok_or_else(|| BuildError::NoBuilder {
                vendor,
                service: message.service.clone(),
            })?;
        builder.build(ctx, message, state)
    }
}

/// Escape text for inclusion in XML element content or attributes
pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Small indenting XML writer shared by the vendor builders
pub(crate) struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    pub(crate) fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    /// `<name attrs>` on its own line
    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.indent();
        let _ = write!(self.out, "<{}", name);
        for (key, value) in attrs {
            let _ = write!(self.out, " {}=\"{}\"", key, xml_escape(value));
        }
        self.out.push_str(">\n");
        self.depth += 1;
    }

    pub(crate) fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = writeln!(self.out, "</{}>", name);
    }

    pub(crate) fn leaf(&mut self, name: &str, value: &str) {
        self.indent();
        let _ = writeln!(self.out, "<{0}>{1}</{0}>", name, xml_escape(value));
    }

    pub(crate) fn empty(&mut self, name: &str) {
        self.indent();
        let _ = writeln!(self.out, "<{}/>", name);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn device(vendor: Vendor) -> DeviceInfo {
        DeviceInfo {
            name: "leaf-1".to_string(),
            vendor,
            platform: String::new(),
            address: "192.0.2.11".to_string(),
            port: 830,
            get_after_config: true,
        }
    }

    pub(crate) fn ctx(vendor: Vendor, order_type: OrderType) -> BuildContext {
        BuildContext {
            device: device(vendor),
            order_type,
        }
    }

    pub(crate) fn l2_message() -> EcMessage {
        EcMessage::new(
            "leaf-1",
            SERVICE_L2_SLICE,
            json!({"slice_id": "slice-a", "vlan_id": 100, "interface": "GigabitEthernet0/0/0/1"}),
        )
    }

    pub(crate) fn l3_message() -> EcMessage {
        EcMessage::new(
            "leaf-1",
            SERVICE_L3_SLICE,
            json!({
                "slice_id": "slice-b",
                "vlan_id": 200,
                "port": "xe-0/0/1",
                "address": "10.0.0.1/30",
                "vrf": "cust-b"
            }),
        )
    }

    pub(crate) fn applied(slice_id: &str, vlan_id: u16) -> DeviceState {
        DeviceState::new(vec![EmInfoRow {
            device: "leaf-1".to_string(),
            slice_id: slice_id.to_string(),
            vlan_id,
            service: SERVICE_L2_SLICE.to_string(),
            order_type: OrderType::Merge,
            ec_body: json!({}),
        }])
    }

    #[test]
    fn test_slice_params_validation() {
        let params = SliceParams::from_message(&l3_message()).unwrap();
        assert_eq!(params.interface, "xe-0/0/1");
        assert_eq!(params.require_address().unwrap(), "10.0.0.1/30");

        let bad_vlan = EcMessage::new(
            "leaf-1",
            SERVICE_L2_SLICE,
            json!({"slice_id": "s", "vlan_id": 5000, "interface": "ge-0/0/0"}),
        );
        assert!(matches!(
            SliceParams::from_message(&bad_vlan),
            Err(BuildError::InvalidParameters { .. })
        ));

        let missing = EcMessage::new("leaf-1", SERVICE_L2_SLICE, json!({"slice_id": "s"}));
        assert!(SliceParams::from_message(&missing).is_err());
    }

    #[test]
    fn test_delete_requires_existing_vlan() {
        let result = prepare(
            &ctx(Vendor::Cisco, OrderType::Delete),
            &l2_message(),
            &DeviceState::default(),
        );
        assert!(matches!(result, Err(BuildError::NotConfigured { vlan_id: 100, .. })));

        let result = prepare(
            &ctx(Vendor::Cisco, OrderType::Delete),
            &l2_message(),
            &applied("slice-a", 100),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_get_order_has_no_payload() {
        let result = prepare(
            &ctx(Vendor::Juniper, OrderType::Get),
            &l2_message(),
            &DeviceState::default(),
        );
        assert!(matches!(result, Err(BuildError::UnsupportedOrder { .. })));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BuilderRegistry::with_defaults();
        assert!(registry.supports(Vendor::Cisco, SERVICE_L2_SLICE));
        assert!(registry.supports(Vendor::Juniper, SERVICE_L3_SLICE));
        assert!(!registry.supports(Vendor::Juniper, "ce-lag"));

        let unknown = EcMessage::new("leaf-1", "ce-lag", json!({}));
        let result = registry.build(
            &ctx(Vendor::Juniper, OrderType::Merge),
            &unknown,
            &DeviceState::default(),
        );
        assert!(matches!(result, Err(BuildError::NoBuilder { .. })));
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
