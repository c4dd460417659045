//! Inventory availability and stock alerts.

use serde_json::Value;

use crate::domain::foundation::ValidationError;
use crate::domain::realtime::{Connection, EventDomain, EventKind, RoomName};

use super::{unsupported, DomainHandler, Fields, HandlerOutcome};

pub struct InventoryHandler;

impl DomainHandler for InventoryHandler {
    fn domain(&self) -> EventDomain {
        EventDomain::Inventory
    }

    fn handle(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        fields.str("itemId")?;
        let outlet_id = fields.outlet_or(&identity.outlet_id)?;

        match kind {
            EventKind::InventoryUpdate => {
                fields.bool("available")?;
                if let Some(quantity) = fields.opt_number("quantity")? {
                    non_negative("quantity", quantity)?;
                }
                Ok(HandlerOutcome::new(
                    "inventory:availability_changed",
                    fields.stamped(&outlet_id, identity),
                )
                .to_room(RoomName::outlet(&outlet_id)))
            }
            EventKind::InventoryLowStock => {
                non_negative("quantity", fields.number("quantity")?)?;
                non_negative("threshold", fields.number("threshold")?)?;
                // Tenant room so head office sees alerts from every outlet.
                Ok(HandlerOutcome::new(
                    "inventory:low_stock_alert",
                    fields.stamped(&outlet_id, identity),
                )
                .to_room(RoomName::outlet(&outlet_id))
                .to_room(RoomName::tenant(&identity.tenant_id)))
            }
            other => Err(unsupported(other)),
        }
    }
}

fn non_negative(field: &str, value: f64) -> Result<f64, ValidationError> {
    if value < 0.0 {
        return Err(ValidationError::invalid_format(field, "must not be negative"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::test_support::staff_connection;
    use serde_json::json;

    #[test]
    fn availability_change_targets_outlet() {
        let conn = staff_connection();
        let data = json!({"itemId": "i1", "available": false, "quantity": 0});

        let outcome = InventoryHandler
            .handle(&conn, EventKind::InventoryUpdate, &data)
            .unwrap();

        assert_eq!(outcome.outbound_type, "inventory:availability_changed");
        assert_eq!(outcome.target_rooms, vec![RoomName::outlet(&conn.identity.outlet_id)]);
        assert_eq!(outcome.outbound_payload["available"], false);
    }

    #[test]
    fn availability_must_be_boolean() {
        let conn = staff_connection();
        let data = json!({"itemId": "i1", "available": "no"});

        assert!(matches!(
            InventoryHandler.handle(&conn, EventKind::InventoryUpdate, &data),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn low_stock_alert_reaches_tenant() {
        let conn = staff_connection();
        let data = json!({"itemId": "i1", "quantity": 2, "threshold": 5});

        let outcome = InventoryHandler
            .handle(&conn, EventKind::InventoryLowStock, &data)
            .unwrap();

        let rooms: Vec<String> = outcome.target_rooms.iter().map(ToString::to_string).collect();
        assert_eq!(rooms, vec!["outlet:o1", "tenant:t1"]);
    }

    #[test]
    fn low_stock_requires_threshold() {
        let conn = staff_connection();
        let data = json!({"itemId": "i1", "quantity": 2});

        assert_eq!(
            InventoryHandler
                .handle(&conn, EventKind::InventoryLowStock, &data)
                .unwrap_err(),
            ValidationError::missing_field("threshold")
        );
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let conn = staff_connection();
        let data = json!({"itemId": "i1", "available": true, "quantity": -1});

        assert!(InventoryHandler
            .handle(&conn, EventKind::InventoryUpdate, &data)
            .is_err());
    }
}
