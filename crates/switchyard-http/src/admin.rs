//! The admin JSON API, served under `/api` behind a bearer token.
//!
//! Endpoints:
//!
//! - `GET  /api/buckets` and `GET /api/buckets/{name}`
//! - `POST /api/buckets/{name}/reset-operations`
//! - `GET  /api/health`
//! - `GET  /api/config`, `POST /api/config`
//! - `GET  /api/stats/monthly[/{year}/{month}]`, `GET /api/stats/monthly/range`
//! - `GET  /api/stats/bucket/{name}/history?months=N`

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use serde::Serialize;
use switchyard_core::backend::{Backend, OperationClass};
use switchyard_core::config::Config;
use switchyard_model::S3Error;
use switchyard_store::MonthlyStats;
use tracing::{info, warn};

use crate::body::GatewayBody;
use crate::handler::Gateway;
use crate::response::json_response;

#[derive(Debug, Serialize)]
struct BucketView {
    name: String,
    endpoint: String,
    region: String,
    max_size: String,
    max_size_bytes: i64,
    used_size: i64,
    available_size: i64,
    usage_percent: f64,
    object_count: i64,
    weight: u32,
    enabled: bool,
    available: bool,
    #[serde(rename = "virtual")]
    virtual_bucket: bool,
    last_checked: DateTime<Utc>,
    operation_count_a: i64,
    operation_count_b: i64,
    operation_limit_reached: bool,
    operation_limits: OperationLimitsView,
}

#[derive(Debug, Serialize)]
struct OperationLimitsView {
    type_a: i64,
    type_b: i64,
}

#[derive(Debug, Serialize)]
struct BucketListView {
    total: usize,
    buckets: Vec<BucketView>,
}

#[derive(Debug, Serialize)]
struct HealthView {
    status: &'static str,
    timestamp: DateTime<Utc>,
    load_balancer_strategy: &'static str,
    total_buckets: usize,
    available_buckets: usize,
}

#[derive(Debug, Serialize)]
struct MonthlyStatsView {
    year: i64,
    month: i64,
    bucket: String,
    stats: OperationCountsView,
}

#[derive(Debug, Serialize)]
struct OperationCountsView {
    operation_count_a: i64,
    operation_count_b: i64,
    total: i64,
}

#[derive(Debug, Serialize)]
struct ErrorView {
    error: String,
}

impl Gateway {
    /// Route one `/api/...` request. Token verification already happened in
    /// the service layer.
    pub async fn handle_admin(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Bytes,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let segments: Vec<&str> = path
            .trim_start_matches("/api")
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["buckets"]) => self.admin_list_buckets(),
            (&Method::GET, ["buckets", name]) => self.admin_bucket_detail(name),
            (&Method::POST, ["buckets", name, "reset-operations"]) => {
                self.admin_reset_operations(name).await
            }
            (&Method::GET, ["health"]) => self.admin_health(),
            (&Method::GET, ["config"]) => self.admin_get_config(),
            (&Method::POST, ["config"]) => self.admin_update_config(&body),
            (&Method::GET, ["stats", "monthly"]) => self.admin_current_month().await,
            (&Method::GET, ["stats", "monthly", "range"]) => {
                self.admin_monthly_range(query).await
            }
            (&Method::GET, ["stats", "monthly", year, month]) => {
                self.admin_monthly(year, month).await
            }
            (&Method::GET, ["stats", "bucket", name, "history"]) => {
                self.admin_bucket_history(name, query).await
            }
            _ => json_response(
                StatusCode::NOT_FOUND,
                &ErrorView {
                    error: "unknown admin endpoint".to_owned(),
                },
            ),
        }
    }

    fn admin_list_buckets(&self) -> Result<http::Response<GatewayBody>, S3Error> {
        let buckets: Vec<BucketView> = self.registry.all().iter().map(|b| bucket_view(b)).collect();
        json_response(
            StatusCode::OK,
            &BucketListView {
                total: buckets.len(),
                buckets,
            },
        )
    }

    fn admin_bucket_detail(&self, name: &str) -> Result<http::Response<GatewayBody>, S3Error> {
        match self.registry.get(name) {
            Some(backend) => json_response(StatusCode::OK, &bucket_view(&backend)),
            None => json_response(
                StatusCode::NOT_FOUND,
                &ErrorView {
                    error: "bucket not found".to_owned(),
                },
            ),
        }
    }

    async fn admin_reset_operations(
        &self,
        name: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        if self.registry.get(name).is_none() {
            return json_response(
                StatusCode::NOT_FOUND,
                &ErrorView {
                    error: "bucket not found".to_owned(),
                },
            );
        }

        match self.reporter.reset_operations(name).await {
            Ok(()) => {
                info!(bucket = name, "operation counters reset via admin API");
                json_response(
                    StatusCode::OK,
                    &serde_json::json!({ "status": "success", "bucket": name }),
                )
            }
            Err(e) => {
                warn!(bucket = name, error = %e, "failed to reset operation counters");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &ErrorView {
                        error: e.to_string(),
                    },
                )
            }
        }
    }

    fn admin_health(&self) -> Result<http::Response<GatewayBody>, S3Error> {
        let all = self.registry.real();
        let available = all.iter().filter(|b| b.is_available()).count();

        let status = if available == 0 {
            "unhealthy"
        } else if available < all.len() / 2 {
            "degraded"
        } else {
            "healthy"
        };

        json_response(
            StatusCode::OK,
            &HealthView {
                status,
                timestamp: Utc::now(),
                load_balancer_strategy: self.balancer.strategy_name(),
                total_buckets: all.len(),
                available_buckets: available,
            },
        )
    }

    fn admin_get_config(&self) -> Result<http::Response<GatewayBody>, S3Error> {
        json_response(StatusCode::OK, self.config_manager.current().as_ref())
    }

    fn admin_update_config(&self, body: &Bytes) -> Result<http::Response<GatewayBody>, S3Error> {
        let config: Config = match serde_json::from_slice(body) {
            Ok(config) => config,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &ErrorView {
                        error: format!("invalid JSON: {e}"),
                    },
                );
            }
        };

        match self.config_manager.apply_update(config) {
            Ok(()) => json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "success": true,
                    "message": "Configuration updated; changes take effect automatically.",
                }),
            ),
            Err(e) => json_response(
                StatusCode::BAD_REQUEST,
                &ErrorView {
                    error: e.to_string(),
                },
            ),
        }
    }

    async fn admin_current_month(&self) -> Result<http::Response<GatewayBody>, S3Error> {
        match self.store.current_month_stats().await {
            Ok(stats) => json_response(StatusCode::OK, &monthly_views(stats)),
            Err(e) => stats_error(&e),
        }
    }

    async fn admin_monthly(
        &self,
        year: &str,
        month: &str,
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let (Ok(year), Ok(month)) = (year.parse::<i32>(), month.parse::<u32>()) else {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorView {
                    error: "invalid year or month".to_owned(),
                },
            );
        };
        if !(1..=12).contains(&month) {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorView {
                    error: "invalid month".to_owned(),
                },
            );
        }

        match self.store.monthly_stats(year, month).await {
            Ok(stats) => json_response(StatusCode::OK, &monthly_views(stats)),
            Err(e) => stats_error(&e),
        }
    }

    async fn admin_monthly_range(
        &self,
        query: &[(String, String)],
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let get = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let parse_year = |name: &str| get(name).and_then(|v| v.parse::<i32>().ok());
        let parse_month =
            |name: &str| get(name).and_then(|v| v.parse::<u32>().ok()).filter(|m| (1..=12).contains(m));

        let (Some(sy), Some(sm), Some(ey), Some(em)) = (
            parse_year("start_year"),
            parse_month("start_month"),
            parse_year("end_year"),
            parse_month("end_month"),
        ) else {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorView {
                    error: "start_year/start_month/end_year/end_month are required".to_owned(),
                },
            );
        };

        match self.store.monthly_range(sy, sm, ey, em).await {
            Ok(stats) => json_response(StatusCode::OK, &monthly_views(stats)),
            Err(e) => stats_error(&e),
        }
    }

    async fn admin_bucket_history(
        &self,
        name: &str,
        query: &[(String, String)],
    ) -> Result<http::Response<GatewayBody>, S3Error> {
        let months = query
            .iter()
            .find(|(k, _)| k == "months")
            .and_then(|(_, v)| v.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(12);

        match self.store.bucket_history(name, months).await {
            Ok(stats) => json_response(StatusCode::OK, &monthly_views(stats)),
            Err(e) => stats_error(&e),
        }
    }
}

fn bucket_view(backend: &Backend) -> BucketView {
    let max = backend.config.max_size_bytes;
    let used = backend.used_bytes();
    let (available_size, usage_percent) = if max > 0 {
        ((max - used).max(0), (used as f64 / max as f64) * 100.0)
    } else {
        (-1, 0.0)
    };

    BucketView {
        name: backend.config.name.clone(),
        endpoint: backend.config.endpoint.clone(),
        region: backend.config.region.clone(),
        max_size: backend.config.max_size.clone(),
        max_size_bytes: max,
        used_size: used,
        available_size,
        usage_percent,
        object_count: backend.object_count(),
        weight: backend.config.weight,
        enabled: backend.config.enabled,
        available: backend.is_available(),
        virtual_bucket: backend.is_virtual(),
        last_checked: backend.last_checked(),
        operation_count_a: backend.operation_count(OperationClass::A),
        operation_count_b: backend.operation_count(OperationClass::B),
        operation_limit_reached: backend.operation_limit_reached(),
        operation_limits: OperationLimitsView {
            type_a: backend.config.operation_limits.type_a,
            type_b: backend.config.operation_limits.type_b,
        },
    }
}

fn monthly_views(stats: Vec<MonthlyStats>) -> Vec<MonthlyStatsView> {
    stats
        .into_iter()
        .map(|s| MonthlyStatsView {
            year: s.year,
            month: s.month,
            bucket: s.bucket_name,
            stats: OperationCountsView {
                operation_count_a: s.operation_count_a,
                operation_count_b: s.operation_count_b,
                total: s.operation_count_a + s.operation_count_b,
            },
        })
        .collect()
}

fn stats_error(e: &switchyard_store::StoreError) -> Result<http::Response<GatewayBody>, S3Error> {
    warn!(error = %e, "failed to fetch statistics");
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ErrorView {
            error: "failed to fetch statistics".to_owned(),
        },
    )
}
