//! An order pipeline running entirely in memory: typed writes through the
//! generated store extension, stream records through the dispatcher, and
//! broker events through the hand-written handlers.

pub mod models {
    include!(concat!(env!("OUT_DIR"), "/models.rs"));
}
mod handlers;

use chrono::Utc;
use dynaform::cdc::{
    BrokerEvent, Dispatcher, MemoryPublisher, MutationKind, RuntimeContext, StreamEvent,
    StreamPayload, StreamRecord,
};
use dynaform::storage::MemoryStorage;
use dynaform::{EnvContext, ErrorKind, Model, Store};
use models::{Order, OrderStatus, StoreExt};
use std::sync::Arc;

const STREAM_ARN: &str =
    "arn:aws:dynamodb:us-east-1:123456789012:table/Orders/stream/2024-01-01T00:00:00.000";

fn main() -> dynaform::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let storage = Arc::new(MemoryStorage::new());
    let env = Arc::new(EnvContext::detached([("TABLE_ORDERS", "Orders")]));
    let store = Store::new(storage.clone(), env);
    let ctx = RuntimeContext::new(store.clone());

    let mut records = Vec::new();
    for (order_id, total) in [("o-1", 42.5), ("o-2", 17.25)] {
        let order = store.create_order(Order {
            customer_id: "c-1".into(),
            order_id: order_id.into(),
            status: OrderStatus::Pending,
            total,
            placed_at: Utc::now(),
            ..Order::default()
        })?;
        log::info!("Created order {} at version {}", order.order_id, order.meta.version);
        records.push(stream_record(MutationKind::Insert, &order));
    }

    let shipped = store.get_order("c-1", "o-1")?;
    let stale = shipped.clone();
    let shipped = store.update_order(Order {
        status: OrderStatus::Shipped,
        ..shipped
    })?;
    records.push(stream_record(MutationKind::Modify, &shipped));
    match store.update_order(stale) {
        Err(e) if e.kind() == ErrorKind::OptimisticLocking => {
            log::info!("Stale update rejected: {e}");
        }
        other => log::warn!("Stale update was not rejected: {other:?}"),
    }

    let dispatcher = Dispatcher::new(MemoryPublisher::new(), Some("orders-changes".into()))?;
    let published = dispatcher.dispatch_all(&StreamEvent { records })?;
    log::info!("Dispatched {published} change event(s)");

    for event in dispatcher.publisher().events() {
        let event = BrokerEvent::from_published(&event)?;
        route(&ctx, &event)?;
    }

    let totals = store.get_customer_totals("c-1")?;
    log::info!(
        "Customer {} has {} order(s) worth {:.2}",
        totals.customer_id,
        totals.order_count,
        totals.amount
    );
    log::info!("{} item(s) stored in Orders", storage.scan("Orders").len());
    Ok(())
}

/// The stream record the table would emit after `order` was written.
fn stream_record(kind: MutationKind, order: &Order) -> StreamRecord {
    StreamRecord {
        event_id: None,
        event_name: kind,
        event_source_arn: STREAM_ARN.to_string(),
        dynamodb: StreamPayload {
            keys: order.key(),
            new_image: Some(order.to_item()),
            ..StreamPayload::default()
        },
    }
}

/// Deliver an event to every handler whose rule would match it.
fn route(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
    if event.source != format!("Orders.{}", Order::TYPE_NAME) {
        return Ok(());
    }
    if event.detail_type == MutationKind::Insert.as_str() {
        handlers::notify_customer::handle(ctx, event)?;
        handlers::tally_orders::handle(ctx, event)?;
    }
    Ok(())
}
