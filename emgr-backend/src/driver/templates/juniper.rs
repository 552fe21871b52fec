//! Juniper Junos payloads.
//!
//! The L2 slice is a VLAN plus an ethernet-switching unit on the access
//! port; the L3 slice is a routed unit placed in a routing instance.

use emgr_shared::{EcMessage, OrderType};

use super::{BuildContext, BuildError, DeviceState, MessageBuilder, XmlWriter, prepare};

fn unit_attrs(order_type: OrderType) -> Vec<(&'static str, &'static str)> {
    match order_type {
        OrderType::Delete => vec![("operation", "delete")],
        OrderType::Replace => vec![("operation", "replace")],
        _ => vec![],
    }
}

fn vlan_name(slice_id: &str, vlan_id: u16) -> String {
    format!("{}-{}", slice_id, vlan_id)
}

/// L2 slice
pub struct JuniperL2Slice;

impl MessageBuilder for JuniperL2Slice {
    fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError> {
        let params = prepare(ctx, message, state)?;
        let attrs = unit_attrs(ctx.order_type);
        let deleting = ctx.order_type == OrderType::Delete;

        let mut xml = XmlWriter::new();
        xml.open("configuration", &[]);

        xml.open("interfaces", &[]);
        xml.open("interface", &[]);
        xml.leaf("name", &params.interface);
        xml.open("unit", &attrs);
        xml.leaf("name", &params.vlan_id.to_string());
        if !deleting {
            xml.leaf("description", &params.description_or_default());
            xml.leaf("vlan-id", &params.vlan_id.to_string());
            xml.open("family", &[]);
            xml.open("ethernet-switching", &[]);
            xml.open("vlan", &[]);
            xml.leaf("members", &vlan_name(&params.slice_id, params.vlan_id));
            xml.close("vlan");
            xml.close("ethernet-switching");
            xml.close("family");
        }
        xml.close("unit");
        xml.close("interface");
        xml.close("interfaces");

        xml.open("vlans", &[]);
        xml.open("vlan", &attrs);
        xml.leaf("name", &vlan_name(&params.slice_id, params.vlan_id));
        if !deleting {
            xml.leaf("vlan-id", &params.vlan_id.to_string());
        }
        xml.close("vlan");
        xml.close("vlans");

        xml.close("configuration");
        Ok(xml.finish())
    }
}

/// L3 slice
pub struct JuniperL3Slice;

impl MessageBuilder for JuniperL3Slice {
    fn build(
        &self,
        ctx: &BuildContext,
        message: &EcMessage,
        state: &DeviceState,
    ) -> Result<String, BuildError> {
        let params = prepare(ctx, message, state)?;
        let attrs = unit_attrs(ctx.order_type);
        let deleting = ctx.order_type == OrderType::Delete;
        let unit = format!("{}.{}", params.interface, params.vlan_id);

        let mut xml = XmlWriter::new();
        xml.open("configuration", &[]);

        xml.open("interfaces", &[]);
        xml.open("interface", &[]);
        xml.leaf("name", &params.interface);
        xml.empty("vlan-tagging");
        xml.open("unit", &attrs);
        xml.leaf("name", &params.vlan_id.to_string());
        if !deleting {
            let address = params.require_address()?;
            xml.leaf("description", &params.description_or_default());
            xml.leaf("vlan-id", &params.vlan_id.to_string());
            xml.open("family", &[]);
            xml.open("inet", &[]);
            xml.open("address", &[]);
            xml.leaf("name", address);
            xml.close("address");
            xml.close("inet");
            xml.close("family");
        }
        xml.close("unit");
        xml.close("interface");
        xml.close("interfaces");

        if let Some(vrf) = &params.vrf {
            xml.open("routing-instances", &[]);
            xml.open("instance", &[]);
            xml.leaf("name", vrf);
            if !deleting {
                xml.leaf("instance-type", "vrf");
            }
            xml.open("interface", &attrs);
            xml.leaf("name", &unit);
            xml.close("interface");
            xml.close("instance");
            xml.close("routing-instances");
        }

        xml.close("configuration");
        Ok(xml.finish())
    }
}
