//! Kitchen order tickets (KOTs).

use serde_json::Value;

use crate::domain::foundation::ValidationError;
use crate::domain::realtime::{Connection, EventDomain, EventKind, RoomName};

use super::{unsupported, DomainHandler, Fields, HandlerOutcome};

/// Statuses a KOT may move through.
pub const KOT_STATUSES: [&str; 5] = ["pending", "preparing", "ready", "served", "cancelled"];

/// Routes KOT events to kitchen displays.
pub struct KitchenHandler;

impl DomainHandler for KitchenHandler {
    fn domain(&self) -> EventDomain {
        EventDomain::Kitchen
    }

    fn handle(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        let outlet_id = match kind {
            EventKind::KotCreate => {
                fields.str("kotId")?;
                fields.str("orderId")?;
                fields.non_empty_array("items")?;
                fields.outlet_or(&identity.outlet_id)?
            }
            EventKind::KotUpdate => {
                fields.str("kotId")?;
                let status = fields.str("status")?;
                if !KOT_STATUSES.contains(&status) {
                    return Err(ValidationError::invalid_format(
                        "status",
                        format!("must be one of {}", KOT_STATUSES.join(", ")),
                    ));
                }
                fields.outlet_or(&identity.outlet_id)?
            }
            other => return Err(unsupported(other)),
        };

        let payload = fields.stamped(&outlet_id, identity);
        Ok(match kind {
            EventKind::KotCreate => {
                HandlerOutcome::new("kitchen:kot_new", payload).to_room(RoomName::kitchen(&outlet_id))
            }
            _ => HandlerOutcome::new("kitchen:kot_status_updated", payload)
                .to_room(RoomName::kitchen(&outlet_id))
                .to_room(RoomName::outlet(&outlet_id)),
        })
    }
}
