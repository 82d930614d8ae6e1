//! Permission strings checked at the approval gates.
//!
//! Permissions are `resource:action`. A grant of `resource:*` covers every
//! action on the resource and `*` covers everything.

pub const PURCHASE_ORDERS_APPROVE: &str = "purchaseorders:approve";
pub const PURCHASE_ORDERS_CANCEL: &str = "purchaseorders:cancel";

pub const GRN_CREATE: &str = "grn:create";
pub const GRN_APPROVE: &str = "grn:approve";
pub const GRN_REJECT: &str = "grn:reject";

pub const OUTWARD_CREATE: &str = "outward:create";
pub const OUTWARD_APPROVE: &str = "outward:approve";

pub const RETURNS_CREATE: &str = "returns:create";
pub const RETURNS_APPROVE: &str = "returns:approve";
pub const RETURNS_REJECT: &str = "returns:reject";

pub const INVENTORY_ADJUST: &str = "inventory:adjust";

/// Returns true when `granted` covers `required`.
pub fn grants(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((resource, "*")), Some((required_resource, _))) => resource == required_resource,
        _ => false,
    }
}
