//! End-to-end session behaviour against a local mock server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockito::{Matcher, Server};

use delve::{
    Error, Filter, FormFilter, Request, Response, Session, SessionConfig, SubmitCheck, Transport,
    TransportError,
};

const ORDER_PAGE: &str = r#"<html><head><title>Order</title></head><body>
  <a href="/menu" id="menu">Menu</a>
  <a href="/about" class="nav">About</a>
  <form id="order" action="/order" method="post">
    <input name="custname">
    <input type="radio" name="size" value="small">
    <input type="radio" name="size" value="large" checked>
    <input type="checkbox" name="topping" value="bacon">
    <input type="checkbox" name="topping" value="onion">
    <select name="drink"><option value="cola">Cola</option><option value="tea">Tea</option></select>
    <input type="hidden" name="token" value="t0k">
  </form>
  <form id="search" action="/search" method="get"><input name="q"></form>
</body></html>"#;

fn config() -> SessionConfig {
    SessionConfig::new()
        .with_max_retries(0)
        .with_retry_backoff(Duration::from_millis(1))
}

async fn html_page(server: &mut Server, path: &str, body: &str) -> mockito::Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_fill_submit_and_go_back() {
    let mut server = Server::new_async().await;
    let page = html_page(&mut server, "/", ORDER_PAGE).await;
    let order = server
        .mock("POST", "/order")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("custname".into(), "Ada".into()),
            Matcher::UrlEncoded("size".into(), "small".into()),
            // repeated keys collapse in UrlEncoded, so match them in order
            Matcher::Regex("topping=bacon&topping=onion".into()),
            Matcher::UrlEncoded("drink".into(), "tea".into()),
            Matcher::UrlEncoded("token".into(), "t0k".into()),
            Matcher::UrlEncoded("coupon".into(), "FREE".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<title>Thanks</title><p>Order received</p>")
        .expect(1)
        .create_async()
        .await;

    let mut session = Session::with_config(config()).unwrap();
    session.open(&server.url()).await.unwrap();

    let mut forms = session.forms(&FormFilter::new().id("order")).unwrap();
    assert_eq!(forms.len(), 1);
    let mut form = forms.remove(0);
    form.set_fields([
        ("custname", vec!["Ada"]),
        ("size", vec!["small"]),
        ("topping", vec!["bacon", "onion"]),
        ("drink", vec!["tea"]),
    ])
    .unwrap();

    let response = session
        .submit(&mut form, &[("coupon".to_string(), "FREE".to_string())])
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(session.title().unwrap().as_deref(), Some("Thanks"));

    let check = SubmitCheck::new()
        .phrase("Order received")
        .status_codes([200]);
    assert!(form.check(&check));
    assert!(session.submit_check(&response, &check));
    assert!(!session.submit_check(&response, &SubmitCheck::new().phrase("Sold out")));

    session.back(1).await.unwrap();
    assert_eq!(session.title().unwrap().as_deref(), Some("Order"));
    let visits = session.history().unwrap();
    assert_eq!(visits.len(), 2);
    assert_eq!(visits[1].method, delve::Method::POST);

    page.assert_async().await;
    order.assert_async().await;
}

#[tokio::test]
async fn test_get_form_sends_query() {
    let mut server = Server::new_async().await;
    let _page = html_page(&mut server, "/", ORDER_PAGE).await;
    let search = server
        .mock("GET", "/search")
        .match_query(Matcher::UrlEncoded("q".into(), "rust".into()))
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<title>Results</title>")
        .create_async()
        .await;

    let mut session = Session::with_config(config()).unwrap();
    session.open(&server.url()).await.unwrap();
    let mut form = session
        .forms(&FormFilter::new().id("search"))
        .unwrap()
        .remove(0);
    form.set_field("q", "rust").unwrap();
    session.submit(&mut form, &[]).await.unwrap();

    assert_eq!(session.title().unwrap().as_deref(), Some("Results"));
    search.assert_async().await;
}

#[tokio::test]
async fn test_links_and_follow() {
    let mut server = Server::new_async().await;
    let _page = html_page(&mut server, "/", ORDER_PAGE).await;
    let _menu = html_page(&mut server, "/menu", "<title>Menu</title>").await;

    let mut session = Session::with_config(config()).unwrap();
    session.open(&server.url()).await.unwrap();

    let links = session.links(&[], &Filter::new()).unwrap();
    assert_eq!(links.len(), 2);
    let menu = session
        .links(&[], &Filter::new().with("id", "menu"))
        .unwrap();
    let target = menu.first().unwrap().url.clone();
    assert_eq!(target.path(), "/menu");

    session.follow("menu").await.unwrap();
    assert_eq!(session.url(), Some(&target));
    assert_eq!(session.title().unwrap().as_deref(), Some("Menu"));
}

#[tokio::test]
async fn test_history_is_bounded() {
    let mut server = Server::new_async().await;
    let mut pages = Vec::new();
    for n in 0..4 {
        pages.push(html_page(&mut server, &format!("/{}", n), &format!("<title>{}</title>", n)).await);
    }

    let mut session = Session::with_config(config().with_max_history(3)).unwrap();
    for n in 0..4 {
        session
            .open(&format!("{}/{}", server.url(), n))
            .await
            .unwrap();
    }

    let paths: Vec<String> = session
        .history()
        .unwrap()
        .into_iter()
        .map(|v| v.url.rsplit('/').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(paths, vec!["1", "2", "3"]);

    session.back(2).await.unwrap();
    assert_eq!(session.title().unwrap().as_deref(), Some("1"));
    assert!(matches!(
        session.back(1).await,
        Err(Error::HistoryBoundary { .. })
    ));
    assert_eq!(session.title().unwrap().as_deref(), Some("1"));
    assert!(matches!(
        session.forward(3).await,
        Err(Error::HistoryBoundary { .. })
    ));
    session.forward(2).await.unwrap();
    assert_eq!(session.title().unwrap().as_deref(), Some("3"));
}

#[tokio::test]
async fn test_redirects_are_recorded() {
    let mut server = Server::new_async().await;
    let _old = server
        .mock("GET", "/old")
        .with_status(302)
        .with_header("location", "/new")
        .create_async()
        .await;
    let _new = html_page(&mut server, "/new", "<title>New</title>").await;

    let mut session = Session::with_config(config()).unwrap();
    let response = session
        .open(&format!("{}/old", server.url()))
        .await
        .unwrap();

    assert_eq!(response.url.path(), "/new");
    assert_eq!(session.request_history().len(), 1);
    assert_eq!(session.request_history()[0].url.path(), "/old");
}

#[tokio::test]
async fn test_cookies_persist_until_clear() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("GET", "/login")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_header("set-cookie", "session=s3cret; Path=/")
        .with_body("<title>Welcome</title>")
        .create_async()
        .await;
    let private = server
        .mock("GET", "/private")
        .match_header("cookie", Matcher::Regex("session=s3cret".into()))
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<title>Private</title>")
        .expect(1)
        .create_async()
        .await;

    let mut session = Session::with_config(config()).unwrap();
    let response = session
        .open(&format!("{}/login", server.url()))
        .await
        .unwrap();
    assert_eq!(
        response.cookies(),
        vec![("session".to_string(), "s3cret".to_string())]
    );
    assert_eq!(
        session.cookies().await,
        vec![("session".to_string(), "s3cret".to_string())]
    );

    session.follow("/private").await.unwrap();
    private.assert_async().await;

    session.clear().await;
    assert!(session.history().unwrap().is_empty());
    session
        .open(&format!("{}/login", server.url()))
        .await
        .unwrap();
    session.clear().await;
    assert!(session.cookies().await.is_empty());
}

#[tokio::test]
async fn test_unparsable_content_type() {
    let mut server = Server::new_async().await;
    let _logo = server
        .mock("GET", "/logo.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body([0x89u8, b'P', b'N', b'G'])
        .create_async()
        .await;
    let url = format!("{}/logo.png", server.url());

    let mut strict = Session::with_config(config()).unwrap();
    assert!(matches!(
        strict.open(&url).await,
        Err(Error::NoParser { .. })
    ));

    let mut lenient = Session::with_config(config().with_strict_parsers(false)).unwrap();
    let response = lenient.open(&url).await.unwrap();
    assert_eq!(response.bytes().len(), 4);
    assert!(lenient.document().is_none());
    assert!(lenient.history().unwrap().is_empty());
}

/// Refuses every connection and counts the attempts.
struct Refusing {
    attempts: AtomicUsize,
}

#[async_trait]
impl Transport for Refusing {
    async fn execute(&self, _request: &Request) -> Result<Response, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Connection("connection refused".into()))
    }
}

#[tokio::test]
async fn test_retries_then_gives_up() {
    let transport = Arc::new(Refusing {
        attempts: AtomicUsize::new(0),
    });
    let config = SessionConfig::new()
        .with_max_retries(3)
        .with_retry_backoff(Duration::from_millis(5));
    let mut session = Session::with_transport(config, transport.clone()).unwrap();

    let started = std::time::Instant::now();
    let err = session.open("https://unreachable.example/").await.unwrap_err();

    assert!(matches!(err, Error::RetriesExhausted { retries: 3, .. }));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    // 5 + 10 + 15 ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(session.response().is_none());
}
