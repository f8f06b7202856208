use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use ulid::Ulid;

use slotbook::booking::{AppointmentBookingTransaction, BookingRequest};
use slotbook::config::Config;
use slotbook::model::Role;
use slotbook::schedule::{AssignmentMode, DayPlanner, DayRequest, TimeGrid};
use slotbook::tenant::TenantManager;

const USAGE: &str = "usage:
  slotbook grid <business> <location> <acting-user> <YYYY-MM-DD>
  slotbook book <business> <location> <acting-user> <assignee> <rfc3339-start> [minutes]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let tenants = TenantManager::new(config.data_dir.clone(), config.compact_threshold);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["grid", business, location, acting, day] => {
            let store = tenants.get_or_open(Ulid::from_string(business)?)?;
            let location_id = Ulid::from_string(location)?;
            let acting_id = Ulid::from_string(acting)?;
            let acting_user = store
                .staff_member(&acting_id)
                .ok_or_else(|| format!("unknown staff member {acting_id}"))?;
            let grid = TimeGrid::parse(day, config.time_zone, config.grid)?;

            let request = DayRequest {
                location_id,
                day: grid.day(),
                acting_user,
                role: Role::Closer,
                scope: store.booking_scope(location_id, acting_id, Role::Closer).await,
                mode: AssignmentMode::Priority,
                duration_minutes: config.appointment_minutes,
            };
            let schedule = DayPlanner::new(store, config.time_zone)
                .with_grid(config.grid)
                .with_overlap_rule(config.overlap_rule)
                .plan_day(request, Utc::now().timestamp_millis())
                .await?;
            println!("{}", serde_json::to_string_pretty(schedule.slots())?);
        }
        ["book", business, location, acting, assignee, start, rest @ ..] if rest.len() <= 1 => {
            let business_id = Ulid::from_string(business)?;
            let store = tenants.get_or_open(business_id)?;
            let start = DateTime::parse_from_rfc3339(start)?.timestamp_millis();
            let minutes = match rest.first() {
                Some(m) => m.parse()?,
                None => config.appointment_minutes,
            };

            let request = BookingRequest::new(
                business_id,
                Ulid::from_string(location)?,
                Ulid::from_string(assignee)?,
                Ulid::from_string(acting)?,
                start,
                minutes,
            );
            let receipt = AppointmentBookingTransaction::new(Arc::clone(&store))
                .with_overlap_rule(config.overlap_rule)
                .commit(&request)
                .await?;
            info!(appointment = %receipt.appointment_id, "booked");
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
