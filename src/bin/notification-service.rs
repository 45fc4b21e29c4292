//! notification-service: sends (stubbed) email notifications

use clap::Parser;
use traced_services::handlers::notification_routes;
use traced_services::service::{self, ServiceArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServiceArgs::parse();
    service::run(args, "notification-service", notification_routes()).await
}
