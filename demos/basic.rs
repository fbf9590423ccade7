use webhook_courier::{Courier, CourierConfig, Event, EventType, NewEndpoint};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut courier = Courier::new(CourierConfig::default());

    let endpoint = courier
        .register_endpoint(
            NewEndpoint::new(
                "https://example.com/webhooks",
                vec![EventType::OrderCreated, EventType::PaymentSettled],
            )
            .with_organization("org_demo")
            .with_filter("region", "eu"),
        )
        .await
        .expect("register endpoint");

    println!("registered {} with secret {}", endpoint.id, endpoint.secret);

    let event = Event::new(
        EventType::OrderCreated,
        serde_json::json!({"order_id": "ord_123", "total_cents": 4200}),
    )
    .with_organization("org_demo")
    .with_context("region", "eu");

    match courier.dispatch(event).await {
        Ok(ids) => println!("dispatched {} deliveries", ids.len()),
        Err(err) => eprintln!("dispatch failed: {err}"),
    }

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    courier.shutdown().await;
}
