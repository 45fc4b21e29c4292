//! order-service: accepts orders and traces their processing

use clap::Parser;
use traced_services::handlers::order_routes;
use traced_services::service::{self, ServiceArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServiceArgs::parse();
    service::run(args, "order-service", order_routes()).await
}
