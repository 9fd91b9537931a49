use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::domain::JobKind;
use crate::error::ApiError;
use crate::orchestrator::CircuitState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

pub async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub state: CircuitState,
    pub probe_ok: bool,
    pub probe_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub kind: &'static str,
    pub depth: i64,
    pub dlq_depth: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminHealth {
    pub database: &'static str,
    pub providers: Vec<ProviderHealth>,
    pub queues: Vec<QueueHealth>,
}

/// Reports database reachability, every provider's circuit state, and
/// queue/DLQ depths for every job kind.
pub async fn admin_health(State(state): State<AppState>) -> Result<Json<AdminHealth>, ApiError> {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "health check database probe failed");
            "unreachable"
        }
    };

    let providers = state
        .orchestrator
        .health_all()
        .await
        .into_iter()
        .map(|report| ProviderHealth {
            name: report.name,
            state: report.circuit,
            probe_ok: report.probe.ok,
            probe_latency_ms: report.probe.latency_ms,
        })
        .collect();

    let mut queues = Vec::new();
    for kind in [JobKind::Image, JobKind::Video, JobKind::Training] {
        queues.push(QueueHealth {
            kind: kind.queue_name(),
            depth: state.queue.queue_depth(kind).await?,
            dlq_depth: state.queue.dlq_depth(kind).await?,
        });
    }

    Ok(Json(AdminHealth {
        database,
        providers,
        queues,
    }))
}
