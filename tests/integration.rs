use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fulfillment_orchestrator::api::rest::router;
use fulfillment_orchestrator::config::Config;
use fulfillment_orchestrator::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

const CUSTOMER: (f64, f64) = (52.52, 13.405);

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Config::default()));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn create_restaurant(app: &axum::Router, name: &str, lat: f64, lng: f64) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/restaurants",
            json!({
                "name": name,
                "location": { "lat": lat, "lng": lng },
                "menu": [{ "name": "ramen", "available_quantity": 10 }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_courier(app: &axum::Router) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/couriers",
            json!({
                "name": "Dispatch Dan",
                "location": { "lat": 52.5, "lng": 13.4 },
                "capacity": 2
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn create_order(app: &axum::Router) -> Value {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/orders",
            json!({
                "items": [{ "name": "Ramen", "quantity": 2 }],
                "customer_location": { "lat": CUSTOMER.0, "lng": CUSTOMER.1 }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

async fn assignments_for(app: &axum::Router, order_id: &str) -> Vec<Value> {
    let (status, body) = send(app, get_request(&format!("/orders/{order_id}/assignments"))).await;
    assert_eq!(status, StatusCode::OK);
    body.as_array().unwrap().clone()
}

fn offer_for<'a>(offers: &'a [Value], restaurant_id: &str) -> &'a Value {
    offers
        .iter()
        .find(|offer| offer["restaurant_id"] == restaurant_id)
        .unwrap()
}

/// Three kitchens near the customer, one order broadcast to all of them.
async fn three_way_race(app: &axum::Router) -> (String, Vec<String>) {
    let restaurants = vec![
        create_restaurant(app, "Alpha", 52.521, 13.406).await,
        create_restaurant(app, "Bravo", 52.53, 13.41).await,
        create_restaurant(app, "Charlie", 52.54, 13.42).await,
    ];
    let order = create_order(app).await;
    assert_eq!(order["dispatch"]["assignments_created"], 3);
    (order["order"]["id"].as_str().unwrap().to_string(), restaurants)
}

async fn accept(app: &axum::Router, assignment_id: &str, restaurant_id: &str) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            &format!("/restaurant-assignments/{assignment_id}/accept"),
            json!({ "restaurant_id": restaurant_id }),
        ),
    )
    .await
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["restaurants"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["tracking_sessions"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("broadcast_assignments_total"));
    assert!(body.contains("active_tracking_sessions"));
}

#[tokio::test]
async fn create_courier_returns_available_courier() {
    let (app, _state) = setup();
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/couriers",
            json!({
                "name": "Alice",
                "location": { "lat": 52.52, "lng": 13.405 },
                "capacity": 5
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Alice");
    assert_eq!(body["capacity"], 5);
    assert_eq!(body["current_load"], 0);
    assert_eq!(body["status"], "available");
}

#[tokio::test]
async fn create_courier_rejects_bad_input() {
    let (app, _state) = setup();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/couriers",
            json!({ "name": "  ", "location": { "lat": 52.52, "lng": 13.405 }, "capacity": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/couriers",
            json!({ "name": "Bob", "location": { "lat": 52.52, "lng": 13.405 }, "capacity": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn restaurant_with_invalid_location_is_rejected() {
    let (app, _state) = setup();
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/restaurants",
            json!({ "name": "Nowhere", "location": { "lat": 95.0, "lng": 13.4 } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid coordinate"));
}

#[tokio::test]
async fn restaurant_with_negative_prep_minutes_is_rejected() {
    let (app, state) = setup();
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/restaurants",
            json!({
                "name": "Time Machine",
                "location": { "lat": 52.52, "lng": 13.405 },
                "menu": [{
                    "name": "ramen",
                    "available_quantity": 10,
                    "prep": { "cook_minutes": -100.0 }
                }]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ramen"));
    assert_eq!(state.store.stats().await.unwrap().restaurants, 0);
}

#[tokio::test]
async fn order_with_out_of_range_ttl_is_rejected() {
    let (app, state) = setup();
    create_restaurant(&app, "Alpha", 52.521, 13.406).await;

    for ttl in [i64::MAX, 24 * 60 + 1] {
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/orders",
                json!({
                    "items": [{ "name": "ramen", "quantity": 1 }],
                    "customer_location": { "lat": CUSTOMER.0, "lng": CUSTOMER.1 },
                    "ttl_minutes": ttl
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(state.store.stats().await.unwrap().orders, 0);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _state) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_without_kitchens_stays_pending() {
    let (app, _state) = setup();
    let body = create_order(&app).await;

    assert_eq!(body["order"]["status"], "pending");
    assert!(body["dispatch"].is_null());
}

#[tokio::test]
async fn candidates_are_ranked_by_distance() {
    let (app, _state) = setup();
    let far = create_restaurant(&app, "Far", 52.54, 13.42).await;
    let near = create_restaurant(&app, "Near", 52.521, 13.406).await;
    create_restaurant(&app, "Out of range", 53.5, 13.4).await;
    let order = create_order(&app).await;
    let order_id = order["order"]["id"].as_str().unwrap();

    let (status, body) = send(&app, get_request(&format!("/orders/{order_id}/candidates"))).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|candidate| candidate["restaurant_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec![near, far]);
}

#[tokio::test]
async fn first_accept_wins_and_late_accept_conflicts() {
    let (app, _state) = setup();
    let (order_id, restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;

    let bravo = offer_for(&offers, &restaurants[1]);
    let (status, body) = accept(&app, bravo["id"].as_str().unwrap(), &restaurants[1]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "restaurant_accepted");
    assert_eq!(body["order"]["restaurant_id"], restaurants[1]);
    assert_eq!(body["cancelled_assignments"].as_array().unwrap().len(), 2);

    let alpha = offer_for(&offers, &restaurants[0]);
    let (status, body) = accept(&app, alpha["id"].as_str().unwrap(), &restaurants[0]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "this order has already been assigned elsewhere");

    let offers = assignments_for(&app, &order_id).await;
    let statuses: Vec<_> = restaurants
        .iter()
        .map(|id| offer_for(&offers, id)["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["cancelled", "accepted", "cancelled"]);
}

#[tokio::test]
async fn accept_by_another_restaurant_is_forbidden() {
    let (app, _state) = setup();
    let (order_id, restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;

    let alpha = offer_for(&offers, &restaurants[0]);
    let (status, _) = accept(&app, alpha["id"].as_str().unwrap(), &restaurants[2]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn all_rejections_exhaust_the_race() {
    let (app, _state) = setup();
    let (order_id, _restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;

    let mut last = Value::Null;
    for offer in &offers {
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                &format!("/restaurant-assignments/{}/reject", offer["id"].as_str().unwrap()),
                json!({ "reason": "kitchen closing" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["assignment"]["status"], "rejected");
        last = body;
    }
    assert_eq!(last["race"]["outcome"], "exhausted");

    let (_, order) = send(&app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["status"], "no_restaurant_accepted");
}

#[tokio::test]
async fn cancelled_broadcast_refuses_accepts() {
    let (app, _state) = setup();
    let (order_id, restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;

    let (status, body) = send(
        &app,
        json_request("POST", &format!("/orders/{order_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled_assignments"].as_array().unwrap().len(), 3);

    let alpha = offer_for(&offers, &restaurants[0]);
    let (status, _) = accept(&app, alpha["id"].as_str().unwrap(), &restaurants[0]).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delivery_runs_from_attachment_to_completion() {
    let (app, state) = setup();
    let (order_id, restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;
    let alpha = offer_for(&offers, &restaurants[0]);
    let (status, _) = accept(&app, alpha["id"].as_str().unwrap(), &restaurants[0]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, prep) = send(&app, get_request(&format!("/orders/{order_id}/prep-estimate"))).await;
    assert_eq!(status, StatusCode::OK);
    let minutes = prep["minutes"].as_i64().unwrap();
    assert!((22..=29).contains(&minutes));
    assert_eq!(prep["fallback"], false);

    let courier_id = create_courier(&app).await;
    let (status, attachment) = send(
        &app,
        json_request(
            "POST",
            &format!("/orders/{order_id}/delivery"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(attachment["delivery"]["status"], "assigned");
    assert_eq!(attachment["zones"].as_array().unwrap().len(), 2);
    let delivery_id = attachment["delivery"]["id"].as_str().unwrap().to_string();

    let second_courier = create_courier(&app).await;
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/orders/{order_id}/delivery"),
            json!({ "courier_id": second_courier }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already has an active delivery"));
    assert_ne!(body["error"], "this order has already been assigned elsewhere");

    let transition = |actor: &str, stage: &str| {
        json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/transition"),
            json!({ "actor_id": actor, "target_stage": stage }),
        )
    };

    let (status, body) = send(&app, transition(&courier_id, "delivered")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "cannot perform this action right now");

    let stranger = "00000000-0000-0000-0000-000000000042";
    let (status, _) = send(&app, transition(stranger, "picked_up")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/locations"),
            json!({ "actor_id": courier_id, "latitude": 52.521, "longitude": 13.406, "accuracy": 4.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "enter");
    assert_eq!(events[0]["metadata"]["zone_type"], "pickup");

    for stage in ["picked_up", "on_the_way", "delivered"] {
        let (status, body) = send(&app, transition(&courier_id, stage)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], stage);
    }

    let (_, order) = send(&app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["status"], "delivered");

    let (_, health) = send(&app, get_request("/health")).await;
    assert_eq!(health["active_zones"], 0);
    assert_eq!(health["tracking_sessions"], 0);
    assert!(state.sessions.is_empty());

    let (_, couriers) = send(&app, get_request("/couriers")).await;
    assert_eq!(couriers[0]["current_load"], 0);
}

#[tokio::test]
async fn courier_rejection_and_eta() {
    let (app, _state) = setup();
    let (order_id, restaurants) = three_way_race(&app).await;
    let offers = assignments_for(&app, &order_id).await;
    let alpha = offer_for(&offers, &restaurants[0]);
    accept(&app, alpha["id"].as_str().unwrap(), &restaurants[0]).await;

    let courier_id = create_courier(&app).await;
    let (_, attachment) = send(
        &app,
        json_request(
            "POST",
            &format!("/orders/{order_id}/delivery"),
            json!({ "courier_id": courier_id }),
        ),
    )
    .await;
    let delivery_id = attachment["delivery"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/eta"),
            json!({ "from": { "lat": CUSTOMER.0, "lng": CUSTOMER.1 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distance_km"], 0.0);
    assert!(body["estimated_delivery_time"].is_string());

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/deliveries/{delivery_id}/reject"),
            json!({ "actor_id": courier_id, "reason": "too far" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation_reason"], "too far");

    let (_, order) = send(&app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["status"], "restaurant_accepted");
}
