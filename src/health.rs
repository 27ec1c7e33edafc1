//! Health and metrics endpoints.

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let connections = state.rooms.connection_count();
    let system_status = get_system_status(&config, connections);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "active_connections": connections,
            "candidate_rooms": state.rooms.room_count(),
            "active_stt_relays": metrics.active_relays,
            "operations_in_flight": state.service.active_operations()
        },
        "memory": get_memory_info(),
        "upstreams": {
            "stt": {
                "endpoint": config.stt.endpoint,
                "configured": !config.stt.api_key.is_empty()
            },
            "llm": {
                "turn_model": config.llm.turn_model,
                "feedback_model": config.llm.feedback_model,
                "configured": !config.llm.api_key.is_empty()
            }
        },
        "system": system_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    let gateway = &metrics.gateway;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "gateway": {
            "active_connections": state.rooms.connection_count(),
            "active_stt_relays": metrics.active_relays,
            "stt_sessions_started": gateway.relay_sessions_started,
            "user_messages": gateway.user_messages,
            "ai_responses": gateway.ai_responses,
            "interviews_finalized": gateway.interviews_finalized,
            "client_errors": gateway.client_errors,
            "cached_entries": state.cache.len().await
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_connections": state.get_config().performance.max_concurrent_connections
        }
    }))
}

fn error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                        * 1024
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb();
                } else if line.starts_with("VmSize:") {
                    vm_size = kb();
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available (pid {})", process::id())
    })
}

fn get_system_status(config: &AppConfig, connections: usize) -> serde_json::Value {
    let limit = config.performance.max_concurrent_connections;
    let usage = if limit > 0 {
        connections as f64 / limit as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "connection_usage_percent": (usage * 100.0).round(),
        "max_connections": limit,
        "current_connections": connections,
        "load_warnings": if usage > 0.8 {
            vec!["High connection usage - consider increasing max_concurrent_connections"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state_with;
    use crate::store::MemoryRecordStore;
    use actix_web::test::{call_and_read_body_json, init_service, TestRequest};
    use actix_web::App;
    use std::sync::Arc;

    #[test]
    fn test_system_status_thresholds() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_connections = 10;
        assert_eq!(get_system_status(&config, 2)["status"], "normal");
        assert_eq!(get_system_status(&config, 8)["status"], "moderate_load");
        assert_eq!(get_system_status(&config, 10)["status"], "high_load");
    }

    #[actix_web::test]
    async fn test_health_reports_gateway_counts() {
        let state = state_with(AppConfig::default(), Arc::new(MemoryRecordStore::new()));
        state.increment_active_relays();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["active_stt_relays"], 1);
        assert_eq!(body["metrics"]["active_connections"], 0);
    }
}
