use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use ulid::Ulid;

use salonbook::calendar::{self, WorkingHours};
use salonbook::catalog::{
    CustomerProvider, InMemoryCatalog, InMemoryCustomers, NewCustomer, ServiceRecord, StaffRecord,
};
use salonbook::rpc;
use salonbook::scheduler::Scheduler;
use salonbook::tenant::{TenantId, TenantManager};

// ── Test infrastructure ──────────────────────────────────────

struct Salon {
    staff: Ulid,
    gel: Ulid,
    nail_art: Ulid,
    customer: Ulid,
}

async fn seed(catalog: &InMemoryCatalog, customers: &InMemoryCustomers, tenant: &str) -> Salon {
    let tenant = TenantId::parse(tenant).unwrap();
    let staff = Ulid::new();
    catalog.upsert_staff(
        &tenant,
        StaffRecord {
            id: staff,
            first_name: "Mali".into(),
            last_name: "Srisuk".into(),
            nickname: Some("Mai".into()),
            active: true,
            specialties: vec!["gel".into()],
        },
    );
    let gel = Ulid::new();
    let nail_art = Ulid::new();
    for (id, name, minutes, price, order) in
        [(gel, "Gel manicure", 60, 500, 1), (nail_art, "Nail art", 30, 300, 2)]
    {
        catalog.upsert_service(
            &tenant,
            ServiceRecord {
                id,
                name: name.into(),
                category: "nails".into(),
                duration_minutes: minutes,
                price: Decimal::from(price),
                active: true,
                display_order: order,
            },
        );
    }
    let customer = customers
        .create(
            &tenant,
            NewCustomer {
                first_name: "Ploy".into(),
                last_name: "Chai".into(),
                phone: "0812345678".into(),
                email: None,
                notes: None,
            },
        )
        .await
        .unwrap()
        .id;
    Salon {
        staff,
        gel,
        nail_art,
        customer,
    }
}

async fn start_test_server() -> (SocketAddr, Salon) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("salonbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tenants = Arc::new(TenantManager::new(dir, 1000, WorkingHours::default()));

    let catalog = Arc::new(InMemoryCatalog::new());
    let customers = Arc::new(InMemoryCustomers::new());
    let salon = seed(&catalog, &customers, "glam").await;
    let scheduler = Arc::new(Scheduler::new(tenants, catalog, customers));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let _ = rpc::process_connection(socket, scheduler).await;
            });
        }
    });

    (addr, salon)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let mut buf = String::new();
        self.reader.read_line(&mut buf).await.unwrap();
        serde_json::from_str(&buf).unwrap()
    }

    async fn call(&mut self, req: Value) -> Value {
        self.send_raw(&req.to_string()).await
    }

    async fn ok(&mut self, req: Value) -> Value {
        let res = self.call(req).await;
        assert!(res.get("ok").is_some(), "expected ok, got {res}");
        res["ok"].clone()
    }

    async fn error_code(&mut self, req: Value) -> String {
        let res = self.call(req).await;
        res["error"]["code"]
            .as_str()
            .unwrap_or_else(|| panic!("expected error, got {res}"))
            .to_string()
    }
}

fn create(salon: &Salon, start: &str, services: &[Ulid]) -> Value {
    json!({
        "pattern": "booking.create",
        "tenant": "glam",
        "data": {
            "customer_id": salon.customer,
            "staff_id": salon.staff,
            "start_time": start,
            "service_ids": services,
        }
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_prices_and_schedules_booking() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let mut req = create(&salon, "2024-03-15T10:00:00Z", &[salon.gel, salon.nail_art]);
    req["data"]["discount"] = json!(50);
    let before = Utc::now();
    let booking = client.ok(req).await;
    let after = Utc::now();

    assert_eq!(booking["status"], "PENDING");
    assert_eq!(booking["total_duration"], 90);
    assert_eq!(booking["start_time"], "2024-03-15T10:00:00Z");
    assert_eq!(booking["end_time"], "2024-03-15T11:30:00Z");
    let total: Decimal = booking["total_amount"].as_str().unwrap().parse().unwrap();
    assert_eq!(total, Decimal::from(750));
    assert_eq!(booking["services"].as_array().unwrap().len(), 2);

    // Numbered by the day the booking was made, not the appointment day.
    let number = booking["booking_number"].as_str().unwrap();
    let (date, suffix) = number.strip_prefix("BK").unwrap().split_once('-').unwrap();
    let made_on = [before, after].map(|t| calendar::compact_date(calendar::to_ms(t)));
    assert!(made_on.contains(&date.to_string()), "{number} not made on {made_on:?}");
    assert_eq!(suffix.len(), 4);
    assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert_eq!(booking["customer"]["first_name"], "Ploy");
    assert_eq!(booking["staff"]["id"], salon.staff.to_string());

    let got = client
        .ok(json!({"pattern": "booking.get", "tenant": "glam", "id": booking["id"]}))
        .await;
    assert_eq!(got, booking);
}

#[tokio::test]
async fn overlap_reports_conflict() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
    let code = client
        .error_code(create(&salon, "2024-03-15T10:30:00Z", &[salon.gel]))
        .await;
    assert_eq!(code, "BOOKING_CONFLICT");

    // Back-to-back is fine.
    client.ok(create(&salon, "2024-03-15T11:00:00Z", &[salon.gel])).await;

    let check = json!({
        "pattern": "booking.has_conflict",
        "tenant": "glam",
        "staff_id": salon.staff,
        "start_time": "2024-03-15T10:45:00Z",
        "end_time": "2024-03-15T11:15:00Z",
    });
    assert_eq!(client.ok(check).await, json!({"conflict": true}));
}

#[tokio::test]
async fn availability_after_booking() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    // 10:00-10:30 blocks every hour-long slot that overlaps it.
    client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.nail_art])).await;
    client.ok(create(&salon, "2024-03-15T14:00:00Z", &[salon.gel])).await;

    let day = client
        .ok(json!({
            "pattern": "booking.check_availability",
            "tenant": "glam",
            "staff_id": salon.staff,
            "date": "2024-03-15",
        }))
        .await;
    let slots = day["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 21);
    let available = |start: &str| {
        slots
            .iter()
            .find(|s| s["start_time"] == start)
            .map(|s| s["available"].as_bool().unwrap())
            .unwrap()
    };
    assert!(available("09:00"));
    assert!(!available("09:30"));
    assert!(!available("10:00"));
    assert!(available("10:30"));
    assert!(!available("14:00"));
    assert!(available("15:00"));
    assert_eq!(slots.last().unwrap()["end_time"], "20:00");
}

#[tokio::test]
async fn cancel_then_cancel_again() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let booking = client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
    let ack = client
        .ok(json!({
            "pattern": "booking.cancel",
            "tenant": "glam",
            "id": booking["id"],
            "reason": "client sick",
        }))
        .await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["booking_number"], booking["booking_number"]);

    let code = client
        .error_code(json!({"pattern": "booking.cancel", "tenant": "glam", "id": booking["id"]}))
        .await;
    assert_eq!(code, "ALREADY_CANCELLED");

    // The slot is free again.
    client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
}

#[tokio::test]
async fn reschedule_and_lock() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let booking = client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
    let moved = client
        .ok(json!({
            "pattern": "booking.update",
            "tenant": "glam",
            "id": booking["id"],
            "data": {"start_time": "2024-03-15T13:00:00Z", "status": "CONFIRMED"},
        }))
        .await;
    assert_eq!(moved["start_time"], "2024-03-15T13:00:00Z");
    assert_eq!(moved["end_time"], "2024-03-15T14:00:00Z");
    assert_eq!(moved["status"], "CONFIRMED");

    client
        .ok(json!({
            "pattern": "booking.update",
            "tenant": "glam",
            "id": booking["id"],
            "data": {"status": "COMPLETED"},
        }))
        .await;
    let code = client
        .error_code(json!({
            "pattern": "booking.update",
            "tenant": "glam",
            "id": booking["id"],
            "data": {"notes": "too late"},
        }))
        .await;
    assert_eq!(code, "BOOKING_LOCKED");
}

#[tokio::test]
async fn public_booking_reuses_customer_by_phone() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let booking = client
        .ok(json!({
            "pattern": "booking.create_public",
            "tenant": "glam",
            "data": {
                "customer_first_name": "Ploy",
                "customer_last_name": "Chai",
                "customer_phone": "0812345678",
                "staff_id": salon.staff,
                "start_time": "2024-03-15T16:00:00Z",
                "service_ids": [salon.gel],
            }
        }))
        .await;
    assert_eq!(booking["customer_id"], json!(salon.customer));
    assert_eq!(booking["created_by"], Value::Null);

    let history = client
        .ok(json!({
            "pattern": "booking.by_customer",
            "tenant": "glam",
            "customer_id": salon.customer,
        }))
        .await;
    assert_eq!(history["meta"]["total"], 1);
    assert_eq!(history["meta"]["limit"], 10);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let booking = client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
    let code = client
        .error_code(json!({"pattern": "booking.get", "tenant": "other", "id": booking["id"]}))
        .await;
    assert_eq!(code, "NOT_FOUND");

    let listed = client
        .ok(json!({"pattern": "booking.list", "tenant": "other"}))
        .await;
    assert_eq!(listed["meta"]["total"], 0);
}

#[tokio::test]
async fn catalog_listing() {
    let (addr, _salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let services = client
        .ok(json!({"pattern": "catalog.services", "tenant": "glam", "category": "nails"}))
        .await;
    let names: Vec<&str> = services
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Gel manicure", "Nail art"]);

    let staff = client.ok(json!({"pattern": "catalog.staff", "tenant": "glam"})).await;
    assert_eq!(staff.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bad_input_keeps_connection_open() {
    let (addr, salon) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let res = client.send_raw("this is not json").await;
    assert_eq!(res["error"]["code"], "VALIDATION_ERROR");

    let res = client
        .call(json!({"pattern": "booking.nuke", "tenant": "glam"}))
        .await;
    assert_eq!(res["error"]["code"], "VALIDATION_ERROR");

    let code = client
        .error_code(create(&salon, "2024-03-15T10:00:00Z", &[Ulid::new()]))
        .await;
    assert_eq!(code, "INVALID_SERVICES");

    let mut req = create(&salon, "2024-03-15T10:00:00Z", &[salon.gel]);
    req["data"]["staff_id"] = json!(Ulid::new());
    assert_eq!(client.error_code(req).await, "INVALID_STAFF");

    // Still serving.
    client.ok(create(&salon, "2024-03-15T10:00:00Z", &[salon.gel])).await;
}

#[tokio::test]
async fn concurrent_clients_one_winner() {
    let (addr, salon) = start_test_server().await;
    let salon = Arc::new(salon);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let salon = salon.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client
                .call(create(&salon, "2024-03-15T12:00:00Z", &[salon.gel]))
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        let res = h.await.unwrap();
        if res.get("ok").is_some() {
            ok += 1;
        } else {
            assert_eq!(res["error"]["code"], "BOOKING_CONFLICT");
        }
    }
    assert_eq!(ok, 1);
}
