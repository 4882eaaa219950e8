use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Pages and chapters served by [`ImageServer`].
#[derive(Debug, Clone, Default)]
pub struct ImageServerConfig {
    /// `(width, height)` of each page; served as `/pages/<i>.png`, 1-based.
    pub pages: Vec<(u32, u32)>,
    /// Page indices that always answer 500 with an HTML body.
    pub failing: HashSet<usize>,
    /// Other misbehaving pages.
    pub quirks: HashMap<usize, PageQuirk>,
    /// Chapter labels on the series listing, in listing order.
    pub chapters: Vec<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum PageQuirk {
    /// 200 with an HTML body instead of an image.
    HtmlInstead,
    /// 200 labelled `image/png` whose bytes do not decode.
    Undecodable,
    /// 500 for the first `n` requests, the real image afterwards.
    FailFirst(usize),
    /// Accepts the request and never answers.
    Stall,
}

#[allow(dead_code)]
pub const UNDECODABLE_BODY: &[u8] = b"placeholder: image temporarily unavailable";

#[derive(Debug, Clone, Default)]
pub struct Seen {
    pub hits: HashMap<String, usize>,
    pub referers: HashSet<String>,
    pub hosts: HashSet<String>,
}

pub struct ImageServer {
    pub base_url: String,
    seen: Arc<Mutex<Seen>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ImageServer {
    pub fn spawn(config: ImageServerConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start image server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let pngs = config
            .pages
            .iter()
            .enumerate()
            .map(|(i, &(width, height))| solid_png(width, height, i as u8))
            .collect::<Vec<_>>();

        let seen = Arc::new(Mutex::new(Seen::default()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_seen = Arc::clone(&seen);
        let thread_base = base_url.clone();
        let handle = thread::spawn(move || {
            let mut stalled = Vec::new();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let hits = {
                    let mut seen = thread_seen.lock().expect("lock seen");
                    let hits = {
                        let entry = seen.hits.entry(path.clone()).or_default();
                        *entry += 1;
                        *entry
                    };
                    for header in request.headers() {
                        if header.field.equiv("Referer") {
                            seen.referers.insert(header.value.to_string());
                        }
                        if header.field.equiv("Host") {
                            seen.hosts.insert(header.value.to_string());
                        }
                    }
                    hits
                };

                let response = if path == "/manga/series" {
                    html(200, listing_html(&thread_base, &config.chapters))
                } else if path.starts_with("/manga/series/chapter-") {
                    html(200, reader_html(config.pages.len()))
                } else if let Some(index) = page_index(&path) {
                    let quirk = config.quirks.get(&index).copied();
                    if let Some(PageQuirk::Stall) = quirk {
                        stalled.push(request);
                        continue;
                    }
                    let failing_now = config.failing.contains(&index)
                        || matches!(quirk, Some(PageQuirk::FailFirst(n)) if hits <= n);
                    if failing_now {
                        html(500, format!("<html><body>page {index} is gone</body></html>"))
                    } else if let Some(PageQuirk::HtmlInstead) = quirk {
                        html(200, format!("<html><body>page {index} moved</body></html>"))
                    } else if let Some(PageQuirk::Undecodable) = quirk {
                        tiny_http::Response::from_data(UNDECODABLE_BODY.to_vec()).with_header(
                            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..])
                                .expect("content type header"),
                        )
                    } else if let Some(png) = pngs.get(index - 1) {
                        tiny_http::Response::from_data(png.clone()).with_header(
                            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..])
                                .expect("content type header"),
                        )
                    } else {
                        html(404, "not found".to_owned())
                    }
                } else {
                    html(404, "not found".to_owned())
                };
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            seen,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn listing_url(&self) -> String {
        format!("{}/manga/series", self.base_url)
    }

    pub fn page_url(&self, index: usize) -> String {
        format!("{}/pages/{index}.png", self.base_url)
    }

    pub fn page_urls(&self, count: usize) -> Vec<String> {
        (1..=count).map(|i| self.page_url(i)).collect()
    }

    pub fn seen(&self) -> Seen {
        self.seen.lock().expect("lock seen").clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.seen().hits.get(path).copied().unwrap_or(0)
    }
}

impl Drop for ImageServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn page_index(path: &str) -> Option<usize> {
    path.strip_prefix("/pages/")?
        .strip_suffix(".png")?
        .parse()
        .ok()
        .filter(|&i| i > 0)
}

fn html(status: u16, body: String) -> tiny_http::Response<Cursor<Vec<u8>>> {
    tiny_http::Response::from_string(body)
        .with_status_code(status)
        .with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
                .expect("content type header"),
        )
}

fn listing_html(base_url: &str, chapters: &[String]) -> String {
    let mut links = String::new();
    for label in chapters {
        let slug = label.to_lowercase().replace(' ', "-");
        links.push_str(&format!(
            "    <a href=\"{base_url}/manga/series/{slug}\">{label}</a>\n"
        ));
    }
    format!(
        "<!doctype html>\n<html>\n  <body>\n    <a href=\"{base_url}/\">Home</a>\n{links}  </body>\n</html>\n"
    )
}

fn reader_html(pages: usize) -> String {
    let mut imgs = String::new();
    for i in 1..=pages {
        imgs.push_str(&format!("      <img src=\"/pages/{i}.png\">\n"));
    }
    format!(
        "<!doctype html>\n<html>\n  <body>\n    <div class=\"container-chapter-reader\">\n{imgs}    </div>\n  </body>\n</html>\n"
    )
}

/// RGBA PNG with a transparent top row, so flattening is exercised.
fn solid_png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = image::RgbaImage::from_fn(width, height, |_, y| {
        if y == 0 {
            image::Rgba([0, 0, 0, 0])
        } else {
            image::Rgba([shade.wrapping_mul(20), 64, 128, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
