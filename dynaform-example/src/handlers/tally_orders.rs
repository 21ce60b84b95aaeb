use crate::models::{CustomerTotals, Order};
use dynaform::cdc::consumer::{self, BrokerEvent, ChangeRecord};
use dynaform::cdc::{Reducer, RuntimeContext};
use dynaform::DynaformError;

/// Keeps a running order count and amount per customer.
pub struct TallyOrders;

impl Reducer for TallyOrders {
    type Source = Order;
    type Target = CustomerTotals;

    fn initial(&self, change: &ChangeRecord<Order>) -> dynaform::Result<CustomerTotals> {
        let order = change
            .current()
            .ok_or_else(|| DynaformError::Unexpected("order change without an image".into()))?;
        Ok(CustomerTotals {
            customer_id: order.customer_id.clone(),
            ..CustomerTotals::default()
        })
    }

    fn reduce(
        &self,
        mut current: CustomerTotals,
        change: &ChangeRecord<Order>,
    ) -> dynaform::Result<CustomerTotals> {
        if let Some(order) = &change.new {
            current.order_count += 1;
            current.amount += order.total;
        }
        Ok(current)
    }
}

pub fn handle(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
    consumer::reduce(ctx, &TallyOrders, event)
}
