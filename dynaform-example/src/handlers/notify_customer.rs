use crate::models::Order;
use dynaform::cdc::consumer::{self, BrokerEvent, ChangeRecord};
use dynaform::cdc::{Reactor, RuntimeContext};

/// Tells the customer their order was placed.
pub struct NotifyCustomer;

impl Reactor for NotifyCustomer {
    type Source = Order;

    fn react(&self, _ctx: &RuntimeContext, change: &ChangeRecord<Order>) -> dynaform::Result<()> {
        if let Some(order) = change.current() {
            log::info!(
                "Notifying customer {}: order {} ({}) totals {:.2}",
                order.customer_id,
                order.order_id,
                order.status.as_str(),
                order.total
            );
        }
        Ok(())
    }
}

pub fn handle(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
    consumer::react(ctx, &NotifyCustomer, event)
}
