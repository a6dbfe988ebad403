//! Newline-delimited JSON request/response protocol over TCP.
//!
//! One request per line:
//! `{"pattern": "booking.create", "tenant": "glam", "actor": null, "data": {...}}`.
//! Each gets exactly one response line, `{"ok": ...}` or
//! `{"error": {"code": "...", "message": "..."}}`, in request order.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::BookingError;
use crate::limits::MAX_REQUEST_LINE_BYTES;
use crate::model::*;
use crate::observability;
use crate::scheduler::Scheduler;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "pattern")]
pub enum Request {
    #[serde(rename = "booking.create")]
    CreateBooking {
        tenant: TenantId,
        #[serde(default)]
        actor: Option<Ulid>,
        data: CreateBookingRequest,
    },
    #[serde(rename = "booking.create_public")]
    CreatePublicBooking {
        tenant: TenantId,
        data: PublicBookingRequest,
    },
    #[serde(rename = "booking.get")]
    GetBooking { tenant: TenantId, id: Ulid },
    #[serde(rename = "booking.list")]
    ListBookings {
        tenant: TenantId,
        #[serde(default)]
        filter: BookingFilter,
        #[serde(default)]
        page: PageRequest,
    },
    #[serde(rename = "booking.update")]
    UpdateBooking {
        tenant: TenantId,
        id: Ulid,
        data: UpdateBookingRequest,
    },
    #[serde(rename = "booking.cancel")]
    CancelBooking {
        tenant: TenantId,
        id: Ulid,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "booking.check_availability")]
    CheckAvailability {
        tenant: TenantId,
        staff_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        duration_minutes: Option<u32>,
    },
    #[serde(rename = "booking.has_conflict")]
    HasConflict {
        tenant: TenantId,
        staff_id: Ulid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        #[serde(default)]
        exclude_booking_id: Option<Ulid>,
    },
    #[serde(rename = "booking.by_staff")]
    BookingsByStaff {
        tenant: TenantId,
        staff_id: Ulid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[serde(rename = "booking.by_customer")]
    BookingsByCustomer {
        tenant: TenantId,
        customer_id: Ulid,
        #[serde(default = "customer_page")]
        page: PageRequest,
    },
    #[serde(rename = "catalog.services")]
    ListServices {
        tenant: TenantId,
        #[serde(default)]
        category: Option<String>,
    },
    #[serde(rename = "catalog.staff")]
    ListStaff { tenant: TenantId },
}

/// Customer history pages are shorter than the general listing.
fn customer_page() -> PageRequest {
    PageRequest { page: 1, limit: 10 }
}

impl Request {
    /// Short label for metrics and logs.
    pub fn pattern(&self) -> &'static str {
        match self {
            Request::CreateBooking { .. } => "booking.create",
            Request::CreatePublicBooking { .. } => "booking.create_public",
            Request::GetBooking { .. } => "booking.get",
            Request::ListBookings { .. } => "booking.list",
            Request::UpdateBooking { .. } => "booking.update",
            Request::CancelBooking { .. } => "booking.cancel",
            Request::CheckAvailability { .. } => "booking.check_availability",
            Request::HasConflict { .. } => "booking.has_conflict",
            Request::BookingsByStaff { .. } => "booking.by_staff",
            Request::BookingsByCustomer { .. } => "booking.by_customer",
            Request::ListServices { .. } => "catalog.services",
            Request::ListStaff { .. } => "catalog.staff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Ok(Value),
    Error(ErrorBody),
}

impl Response {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

impl From<BookingError> for Response {
    fn from(e: BookingError) -> Self {
        Response::error(e.code(), e.to_string())
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, BookingError> {
    serde_json::to_value(value).map_err(|e| BookingError::Storage(format!("encode response: {e}")))
}

pub async fn dispatch(scheduler: &Scheduler, req: Request) -> Result<Value, BookingError> {
    match req {
        Request::CreateBooking {
            tenant,
            actor,
            data,
        } => to_json(scheduler.create_booking(&tenant, actor, data).await?),
        Request::CreatePublicBooking { tenant, data } => {
            to_json(scheduler.create_public_booking(&tenant, data).await?)
        }
        Request::GetBooking { tenant, id } => to_json(scheduler.get_booking(&tenant, id).await?),
        Request::ListBookings {
            tenant,
            filter,
            page,
        } => to_json(scheduler.list_bookings(&tenant, filter, page).await?),
        Request::UpdateBooking { tenant, id, data } => {
            to_json(scheduler.update_booking(&tenant, id, data).await?)
        }
        Request::CancelBooking { tenant, id, reason } => {
            to_json(scheduler.cancel_booking(&tenant, id, reason).await?)
        }
        Request::CheckAvailability {
            tenant,
            staff_id,
            date,
            duration_minutes,
        } => {
            let day = scheduler
                .check_availability(&tenant, staff_id, date, duration_minutes)
                .await?;
            to_json(day.to_view())
        }
        Request::HasConflict {
            tenant,
            staff_id,
            start_time,
            end_time,
            exclude_booking_id,
        } => {
            let conflict = scheduler
                .has_conflict(&tenant, staff_id, start_time, end_time, exclude_booking_id)
                .await?;
            Ok(serde_json::json!({ "conflict": conflict }))
        }
        Request::BookingsByStaff {
            tenant,
            staff_id,
            from,
            to,
        } => to_json(scheduler.bookings_by_staff(&tenant, staff_id, from, to).await?),
        Request::BookingsByCustomer {
            tenant,
            customer_id,
            page,
        } => to_json(
            scheduler
                .bookings_by_customer(&tenant, customer_id, page)
                .await?,
        ),
        Request::ListServices { tenant, category } => {
            to_json(scheduler.list_services(&tenant, category.as_deref()).await?)
        }
        Request::ListStaff { tenant } => to_json(scheduler.list_staff(&tenant).await?),
    }
}

/// Parse and execute one request line.
pub async fn handle_line(scheduler: &Scheduler, line: &str) -> Response {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(observability::RPC_REQUESTS_TOTAL,
                "pattern" => "unknown", "status" => "error")
            .increment(1);
            return Response::error("VALIDATION_ERROR", format!("bad request: {e}"));
        }
    };

    let pattern = req.pattern();
    let started = Instant::now();
    let result = dispatch(scheduler, req).await;
    metrics::histogram!(observability::RPC_DURATION_SECONDS, "pattern" => pattern)
        .record(started.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::RPC_REQUESTS_TOTAL,
        "pattern" => pattern, "status" => status)
    .increment(1);

    match result {
        Ok(value) => Response::Ok(value),
        Err(e) => e.into(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("codec: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(
    socket: S,
    scheduler: Arc<Scheduler>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_BYTES));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&scheduler, &line).await,
            // The codec skips to the next newline by itself.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::error("LIMIT_EXCEEDED", "request line too long")
            }
            Err(e) => return Err(e.into()),
        };
        framed.send(serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_request() {
        let line = r#"{"pattern":"booking.create","tenant":"glam","data":{
            "customer_id":"01HQ0000000000000000000001",
            "staff_id":"01HQ0000000000000000000002",
            "start_time":"2024-03-15T10:00:00Z",
            "service_ids":["01HQ0000000000000000000003"],
            "discount": 50
        }}"#;
        let req: Request = serde_json::from_str(line).unwrap();
        assert_eq!(req.pattern(), "booking.create");
        match req {
            Request::CreateBooking { tenant, actor, data } => {
                assert_eq!(tenant.as_str(), "glam");
                assert!(actor.is_none());
                assert_eq!(data.discount, Some(rust_decimal::Decimal::from(50)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_defaults_paging() {
        let req: Request =
            serde_json::from_str(r#"{"pattern":"booking.list","tenant":"glam"}"#).unwrap();
        match req {
            Request::ListBookings { page, filter, .. } => {
                assert_eq!(page, PageRequest { page: 1, limit: 20 });
                assert_eq!(filter, BookingFilter::default());
            }
            other => panic!("unexpected {other:?}"),
        }

        let req: Request = serde_json::from_str(
            r#"{"pattern":"booking.by_customer","tenant":"glam","customer_id":"01HQ0000000000000000000001"}"#,
        )
        .unwrap();
        assert!(matches!(
            req,
            Request::BookingsByCustomer { page: PageRequest { limit: 10, .. }, .. }
        ));
    }

    #[test]
    fn bad_tenant_rejected_at_parse() {
        let res = serde_json::from_str::<Request>(
            r#"{"pattern":"booking.get","tenant":"../etc","id":"01HQ0000000000000000000001"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn response_shape() {
        let ok = serde_json::to_string(&Response::Ok(serde_json::json!({"conflict": false}))).unwrap();
        assert_eq!(ok, r#"{"ok":{"conflict":false}}"#);

        let err: Response = BookingError::AlreadyCancelled.into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], "ALREADY_CANCELLED");
    }

    #[tokio::test]
    async fn connection_skips_blank_lines_and_answers_in_order() {
        use crate::calendar::WorkingHours;
        use crate::catalog::{InMemoryCatalog, InMemoryCustomers};
        use crate::tenant::TenantManager;

        let dir = std::env::temp_dir().join(format!("salonbook_rpc_unit_{}", Ulid::new()));
        let tenants = Arc::new(TenantManager::new(dir, 1000, WorkingHours::default()));
        let scheduler = Arc::new(Scheduler::new(
            tenants,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryCustomers::new()),
        ));

        let id = "01HQ0000000000000000000001";
        let get = format!(r#"{{"pattern":"booking.get","tenant":"glam","id":"{id}"}}"#);
        let not_found =
            format!(r#"{{"error":{{"code":"NOT_FOUND","message":"booking not found: {id}"}}}}"#);
        let mock = tokio_test::io::Builder::new()
            .read(format!("\n{get}\n").as_bytes())
            .write(format!("{not_found}\n").as_bytes())
            .read(b"{\"pattern\":\"catalog.staff\",\"tenant\":\"glam\"}\n")
            .write(b"{\"ok\":[]}\n")
            .build();
        process_connection(mock, scheduler).await.unwrap();
    }
}
