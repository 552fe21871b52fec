//! Cisco IOS-XR payloads.
//!
//! Slices are modelled as dot1q sub-interfaces `{interface}.{vlan}`; the L3
//! variant adds an IPv4 address and VRF binding.

use emgr_shared::{EcMessage, OrderType};

use super::{BuildContext, BuildError, DeviceState, MessageBuilder, XmlWriter, prepare};

const NETCONF_BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const IFMGR_NS: &str = "http://cisco.com/ns/yang/Cisco-IOS-XR-ifmgr-cfg";

fn operation(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Delete => "delete",
        OrderType::Replace => "replace",
        _ => "merge",
    }
}

/// Opens `<config>` and the interface-configuration entry shared by both services
fn open_interface(xml: &mut XmlWriter, order_type: OrderType, name: &str) {
    xml.open("config", &[("xmlns:xc", NETCONF_BASE_NS)]);
    xml.open("interface-configurations", &[("xmlns", IFMGR_NS)]);
    xml.open(
        "interface-configuration",
        &[("xc:operation", operation(order_type))],
    );
    xml.leaf("active", "act");
    xml.leaf("interface-name", name);
}

fn close_interface(xml: &mut XmlWriter) {
    xml.close("interface-configuration");
    xml.close("interface-configurations");
    xml.close("config");
}

fn dot1q(xml: &mut XmlWriter, vlan_id: u16) {
    xml.open("vlan-sub-configuration", &[]);
    xml.open("vlan-identifier", &[]);
    xml.leaf("vlan-type", "vlan-type-dot1q");
    xml.leaf("first-tag", &vlan_id.to_string());
    xml.close("vlan-identifier");
    xml.close("vlan-sub-configuration");
}

/// L2 slice: l2-transport sub-interface
pub struct CiscoL2Slice;

impl MessageBuilder for CiscoL2Slice {
    fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError> {
        let params = prepare(ctx, message, state)?;
        let name = format!("{}.{}", params.interface, params.vlan_id);

        let mut xml = XmlWriter::new();
        open_interface(&mut xml, ctx.order_type, &name);
        if ctx.order_type != OrderType::Delete {
            xml.leaf("interface-mode-non-physical", "l2-transport");
            xml.leaf("description", &params.description_or_default());
            dot1q(&mut xml, params.vlan_id);
        }
        close_interface(&mut xml);
        Ok(xml.finish())
    }
}

/// L3 slice: routed sub-interface inside a VRF
pub struct CiscoL3Slice;

impl MessageBuilder for CiscoL3Slice {
    fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError> {
        let params = prepare(ctx, message, state)?;
        let name = format!("{}.{}", params.interface, params.vlan_id);

        let mut xml = XmlWriter::new();
        open_interface(&mut xml, ctx.order_type, &name);
        if ctx.order_type != OrderType::Delete {
            let address = params.require_address()?;
            let (ip, prefix) = address.split_once('/').unwrap_or((address, "32"));

            xml.leaf("interface-mode-non-physical", "default");
            xml.leaf("description", &params.description_or_default());
            if let Some(vrf) = &params.vrf {
                xml.leaf("vrf", vrf);
            }
            xml.open("ipv4-network", &[]);
            xml.open("addresses", &[]);
            xml.open("primary", &[]);
            xml.leaf("address", ip);
            xml.leaf("prefix-length", prefix);
            xml.close("primary");
            xml.close("addresses");
            xml.close("ipv4-network");
            dot1q(&mut xml, params.vlan_id);
        }
        close_interface(&mut xml);
        Ok(xml.finish())
    }
}
