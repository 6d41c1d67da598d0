mod client;
mod config;
mod controller;
mod error;
mod protocol;
mod session;
mod types;

pub use client::{FrisquetClient, FrisquetClientBuilder, RequestOptions};
pub use config::{decode_password, Config, PASSWORD_ENV};
pub use controller::{accessory_id, Controller, DEFAULT_DEBOUNCE, OUTDOOR_SENSOR_ID};
pub use error::{Error, Result};
pub use protocol::{
    LoginResponse, SiteRef, User, DEFAULT_APP_ID, DEFAULT_HOSTNAME, DEFAULT_USER_AGENT,
};
pub use session::{calculate_delay, Backoff, Session};
pub use types::*;
