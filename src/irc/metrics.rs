//! Prometheus metric names for tarn.
//!
//! Call sites use these constants rather than raw strings. Recording is a
//! no-op until a recorder is installed (`--metrics`), so the relay behaves
//! the same with metrics disabled.

use metrics::{describe_counter, describe_gauge};

/// Total TCP connections accepted (plain and TLS).
pub const CONNECTIONS_ACCEPTED: &str = "tarn_connections_accepted_total";
/// Total sessions that completed registration.
pub const CLIENTS_REGISTERED: &str = "tarn_clients_registered_total";
/// Total room joins, labelled by room.
pub const ROOM_JOINS: &str = "tarn_room_joins_total";
/// Current number of open sessions (gauge).
pub const CLIENTS_CONNECTED: &str = "tarn_clients_connected";
/// Total commands applied by the coordinator, labelled by verb.
pub const COMMANDS: &str = "tarn_commands_total";
/// Total commands answered with an error numeric, labelled by failure class.
pub const COMMANDS_REJECTED: &str = "tarn_commands_rejected_total";

/// Register help text for every metric.
pub fn describe() {
    describe_counter!(CONNECTIONS_ACCEPTED, "Connections accepted during the server lifetime.");
    describe_counter!(CLIENTS_REGISTERED, "Clients registered during the server lifetime.");
    describe_counter!(ROOM_JOINS, "Room joins during the server lifetime, per room.");
    describe_gauge!(CLIENTS_CONNECTED, "Currently connected clients.");
    describe_counter!(COMMANDS, "Commands applied, per verb.");
    describe_counter!(COMMANDS_REJECTED, "Commands rejected, per failure class.");
}
