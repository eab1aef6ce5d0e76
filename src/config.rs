use std::env;

use crate::error::AppError;

/// Longest an offer may stay open, one day.
pub const MAX_ASSIGNMENT_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub candidate_radius_km: f64,
    pub max_candidate_radius_km: f64,
    pub assignment_ttl_minutes: i64,
    pub max_broadcast_attempts: u32,
    pub expiry_sweep_interval_secs: u64,
    pub pickup_zone_radius_m: f64,
    pub delivery_zone_radius_m: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            candidate_radius_km: parse_or_default("CANDIDATE_RADIUS_KM", 15.0)?,
            max_candidate_radius_km: parse_or_default("MAX_CANDIDATE_RADIUS_KM", 50.0)?,
            assignment_ttl_minutes: parse_or_default("ASSIGNMENT_TTL_MINUTES", 15)?,
            max_broadcast_attempts: parse_or_default("MAX_BROADCAST_ATTEMPTS", 3)?,
            expiry_sweep_interval_secs: parse_or_default("EXPIRY_SWEEP_INTERVAL_SECS", 30)?,
            pickup_zone_radius_m: parse_or_default("PICKUP_ZONE_RADIUS_M", 100.0)?,
            delivery_zone_radius_m: parse_or_default("DELIVERY_ZONE_RADIUS_M", 50.0)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(self.candidate_radius_km > 0.0 && self.candidate_radius_km.is_finite()) {
            return Err(AppError::Internal(
                "CANDIDATE_RADIUS_KM must be a positive number".to_string(),
            ));
        }
        if self.max_candidate_radius_km < self.candidate_radius_km {
            return Err(AppError::Internal(
                "MAX_CANDIDATE_RADIUS_KM must not be below CANDIDATE_RADIUS_KM".to_string(),
            ));
        }
        if self.assignment_ttl_minutes <= 0 {
            return Err(AppError::Internal(
                "ASSIGNMENT_TTL_MINUTES must be > 0".to_string(),
            ));
        }
        if self.assignment_ttl_minutes > MAX_ASSIGNMENT_TTL_MINUTES {
            return Err(AppError::Internal(format!(
                "ASSIGNMENT_TTL_MINUTES must be at most {MAX_ASSIGNMENT_TTL_MINUTES}"
            )));
        }
        if self.max_broadcast_attempts == 0 {
            return Err(AppError::Internal(
                "MAX_BROADCAST_ATTEMPTS must be > 0".to_string(),
            ));
        }
        if self.expiry_sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "EXPIRY_SWEEP_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            candidate_radius_km: 15.0,
            max_candidate_radius_km: 50.0,
            assignment_ttl_minutes: 15,
            max_broadcast_attempts: 3,
            expiry_sweep_interval_secs: 30,
            pickup_zone_radius_m: 100.0,
            delivery_zone_radius_m: 50.0,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
