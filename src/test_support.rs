//! Stand-in upstream servers for unit tests.

use axum::Router;
use tokio::net::TcpListener;
use url::Url;

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn serve(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake upstream");
    let addr = listener.local_addr().expect("fake upstream address");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("fake upstream server");
    });
    Url::parse(&format!("http://{addr}")).expect("fake upstream url")
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway port");
    let addr = listener.local_addr().expect("throwaway address");
    drop(listener);
    Url::parse(&format!("http://{addr}")).expect("dead url")
}
