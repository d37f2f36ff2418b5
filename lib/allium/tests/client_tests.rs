//! Client tests over stub transports: URL resolution, header merging,
//! pipeline outcomes, and cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert2::{check, let_assert};

use allium::{
    CallOptions, CancelHandle, Client, Error, Method, Request, Response, Result, TaskSlot,
    Transport, middleware,
};

/// Transport that records every request and replays canned outcomes.
#[derive(Debug, Default)]
struct MockTransport {
    seen: Mutex<Vec<Request>>,
    outcomes: Mutex<VecDeque<Result<Response>>>,
}

impl MockTransport {
    fn replying(outcomes: impl IntoIterator<Item = Result<Response>>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }

    fn ok_json(body: &str) -> Self {
        Self::replying([Ok(Response::new(200, HashMap::new(), body.to_string()))])
    }

    fn requests(&self) -> Vec<Request> {
        self.seen.lock().expect("lock").clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: Request, _task: TaskSlot) -> Result<Response> {
        self.seen.lock().expect("lock").push(request);
        self.outcomes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(Error::connection("no canned outcome left")))
    }
}

/// Transport that never answers until cancelled.
#[derive(Debug)]
struct SlowTransport;

impl Transport for SlowTransport {
    async fn send(&self, _request: Request, task: TaskSlot) -> Result<Response> {
        let (handle, signal) = CancelHandle::channel();
        task.register(handle);

        tokio::select! {
            () = signal => Err(Error::Cancelled),
            () = tokio::time::sleep(Duration::from_secs(60)) => {
                Ok(Response::new(200, HashMap::new(), "late"))
            }
        }
    }
}

fn mock_client(transport: MockTransport) -> Client<MockTransport> {
    Client::builder()
        .base_url("https://api.example.com".parse().expect("url"))
        .build_with_transport(transport)
}

#[derive(serde::Deserialize, Debug, PartialEq)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn get_resolves_relative_path_against_base_url() {
    let client = mock_client(MockTransport::ok_json(r#"{"id":1,"name":"x"}"#));

    let_assert!(Ok(Some(response)) = client.get("/users/1").await);
    let user: User = response.json().expect("decode");
    check!(
        user == User {
            id: 1,
            name: "x".to_string()
        }
    );

    let seen = client.transport().requests();
    check!(seen.len() == 1);
    check!(seen[0].url.as_str() == "https://api.example.com/users/1");
    check!(seen[0].method == Method::Get);
}

#[tokio::test]
async fn absolute_url_bypasses_base() {
    let client = mock_client(MockTransport::ok_json("{}"));

    let_assert!(Ok(Some(_)) = client.get("https://other.example.com/health").await);

    let seen = client.transport().requests();
    check!(seen[0].url.as_str() == "https://other.example.com/health");
}

#[tokio::test]
async fn relative_path_without_base_url_is_rejected() {
    let client = Client::builder().build_with_transport(MockTransport::ok_json("{}"));

    let_assert!(Err(err) = client.get("/users/1").await);
    check!(err.to_string().contains("requires a base URL"));
    // The transport was never reached.
    check!(client.transport().requests().is_empty());
}

#[tokio::test]
async fn call_site_headers_win_over_defaults() {
    let client = Client::builder()
        .base_url("https://api.example.com".parse().expect("url"))
        .default_header("Accept", "application/json")
        .default_header("X-Tenant", "default")
        .build_with_transport(MockTransport::ok_json("{}"));

    let options = CallOptions::new().header("X-Tenant", "acme");
    let_assert!(
        Ok(Some(_)) = client
            .request(Method::Get, "/users", None, options)
            .await
    );

    let seen = client.transport().requests();
    check!(seen[0].header("Accept") == Some("application/json"));
    check!(seen[0].header("X-Tenant") == Some("acme"));
}

#[tokio::test]
async fn middleware_rewrites_are_visible_at_the_transport() {
    let mut client = mock_client(MockTransport::ok_json("{}"));
    client
        .with(middleware::bearer_auth("secret"))
        .with(|ctx, next| async move {
            ctx.with(|c| {
                c.request
                    .headers
                    .insert("X-Trace".to_string(), "abc".to_string());
            });
            next.run().await
        });

    let_assert!(Ok(Some(_)) = client.get("/users").await);

    let seen = client.transport().requests();
    check!(seen[0].header("Authorization") == Some("Bearer secret"));
    check!(seen[0].header("X-Trace") == Some("abc"));
}

#[tokio::test]
async fn post_sends_the_body() {
    let client = mock_client(MockTransport::ok_json("{}"));

    let_assert!(
        Ok(Some(_)) = client.post("/users", r#"{"name":"x"}"#).await
    );

    let seen = client.transport().requests();
    check!(seen[0].method == Method::Post);
    check!(seen[0].body.as_deref() == Some(br#"{"name":"x"}"#.as_ref()));
}

#[tokio::test]
async fn unhandled_transport_error_reaches_the_caller() {
    let client = mock_client(MockTransport::replying([Err(Error::connection(
        "connection refused",
    ))]));

    let_assert!(Err(err) = client.get("/users").await);
    check!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn handled_error_without_recovery_resolves_to_none() {
    let mut client = mock_client(MockTransport::replying([Err(Error::Timeout)]));
    client.catch(|_err, ctx| async move {
        ctx.with(|c| c.error_handled = true);
        Ok(())
    });

    let_assert!(Ok(None) = client.get("/users").await);
}

#[tokio::test]
async fn handled_error_with_recovery_response_resolves_to_it() {
    let mut client = mock_client(MockTransport::replying([Err(Error::Timeout)]));
    client.catch(|err, ctx| async move {
        if err.is_timeout() {
            ctx.with(|c| {
                c.response = Some(Response::new(200, HashMap::new(), "cached"));
                c.error_handled = true;
            });
        }
        Ok(())
    });

    let_assert!(Ok(Some(response)) = client.get("/users").await);
    check!(response.text() == "cached");
}

#[tokio::test]
async fn cancel_handle_aborts_the_in_flight_request() {
    let client = Client::builder()
        .base_url("https://api.example.com".parse().expect("url"))
        .build_with_transport(SlowTransport);

    let (response, task) = client
        .request(Method::Get, "/slow", None, CallOptions::new())
        .into_parts();
    let response = tokio::spawn(response);

    let_assert!(Some(handle) = task.await);
    handle.cancel();

    let_assert!(Ok(Err(err)) = response.await);
    check!(err.is_cancelled());
}

#[tokio::test]
async fn task_future_resolves_none_for_a_transport_that_never_registers() {
    let client = mock_client(MockTransport::ok_json("{}"));

    let (response, task) = client
        .request(Method::Get, "/users", None, CallOptions::new())
        .into_parts();

    let_assert!(Ok(Some(_)) = response.await);
    check!(task.await.is_none());
}

#[tokio::test]
async fn awaiting_dispatched_directly_yields_the_response() {
    let client = mock_client(MockTransport::ok_json(r#"{"ok":true}"#));

    let dispatched = client.request(Method::Get, "/health", None, CallOptions::new());
    let_assert!(Ok(Some(response)) = dispatched.await);
    check!(response.status() == 200);
}
