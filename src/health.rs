//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::database::get_pool_stats;
use crate::services::psp_service::PspService;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.status, HealthState::Unhealthy)
    }

    fn record(&mut self, component: &str, health: ComponentHealth) {
        match health.status {
            ComponentState::Down => self.status = HealthState::Unhealthy,
            ComponentState::Warning if self.status == HealthState::Healthy => {
                self.status = HealthState::Degraded
            }
            _ => {}
        }
        self.checks.insert(component.to_string(), health);
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    /// `None` when serving from the in-memory store
    db_pool: Option<sqlx::PgPool>,
    psp: Arc<PspService>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, psp: Arc<PspService>) -> Self {
        Self { db_pool, psp }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let database = match &self.db_pool {
            None => ComponentHealth::warning(None, Some("in-memory store".to_string())),
            Some(pool) => {
                match timeout(Duration::from_secs(5), check_database_health(pool)).await {
                    Ok(Ok(response_time)) => {
                        debug!(response_time_ms = response_time, "database health check ok");
                        let stats = get_pool_stats(pool);
                        ComponentHealth {
                            details: Some(format!(
                                "pool size {}, idle {}",
                                stats.size, stats.num_idle
                            )),
                            ..ComponentHealth::up(Some(response_time))
                        }
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "database health check failed");
                        ComponentHealth::down(Some(e.to_string()))
                    }
                    Err(_) => {
                        error!("database health check timed out");
                        ComponentHealth::down(Some("Timeout".to_string()))
                    }
                }
            }
        };
        health_status.record("database", database);

        let providers = self.psp.available_providers();
        let psp = if providers.is_empty() {
            ComponentHealth::down(Some("no payment providers registered".to_string()))
        } else {
            ComponentHealth {
                details: Some(
                    providers
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                ..ComponentHealth::up(None)
            }
        };
        health_status.record("psp_registry", psp);

        health_status
    }
}

pub async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, sqlx::Error> {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(start.elapsed().as_millis())
}
