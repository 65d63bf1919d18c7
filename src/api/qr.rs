//! QR pairing endpoints
//!
//! `/qr/data` exposes the current pairing code as text; the `/qr` page
//! renders it client-side. The bridge never rasterizes codes itself.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, Json};
use serde::Serialize;

use super::ApiState;
use crate::session::Status;

/// Pairing state response
#[derive(Serialize)]
pub struct QrDataResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Current pairing code (or paired phone when already connected)
pub async fn data(State(state): State<Arc<ApiState>>) -> Json<QrDataResponse> {
    let status = state.session.status();
    let mut response = QrDataResponse {
        status: status.as_str(),
        qr: None,
        phone: None,
    };

    if status == Status::Connected {
        response.phone = state.session.device_id();
    } else {
        response.qr = state.session.latest_qr();
    }

    Json(response)
}

/// Pairing page that polls `/qr/data` and renders the code
pub async fn page() -> Html<&'static str> {
    Html(QR_PAGE_HTML)
}

const QR_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Wavelink &mdash; Link Device</title>
<script src="https://cdn.jsdelivr.net/npm/qrcode@1.5.3/build/qrcode.min.js"></script>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #0a0a0a;
    color: #e0e0e0;
    display: flex;
    justify-content: center;
    align-items: center;
    min-height: 100vh;
  }
  .card {
    background: #1a1a1a;
    border: 1px solid #333;
    border-radius: 16px;
    padding: 48px;
    text-align: center;
    max-width: 460px;
    width: 100%;
  }
  h1 { font-size: 20px; font-weight: 600; margin-bottom: 8px; }
  .subtitle { color: #888; font-size: 14px; margin-bottom: 32px; }
  #qr-container {
    width: 280px; height: 280px;
    margin: 0 auto 24px;
    display: flex;
    align-items: center;
    justify-content: center;
    background: #fff;
    border-radius: 12px;
  }
  #qr-container canvas { width: 260px; height: 260px; }
  #status { font-size: 14px; color: #888; margin-top: 8px; }
  .connected { color: #4ade80 !important; font-size: 18px !important; font-weight: 600; }
  .waiting { color: #888; font-size: 13px; }
</style>
</head>
<body>
<div class="card">
  <h1>Link WhatsApp</h1>
  <p class="subtitle">Open WhatsApp on your phone, go to Settings &gt; Linked Devices &gt; Link a Device</p>
  <div id="qr-container"><span class="waiting" id="loading">Waiting for pairing code&hellip;</span></div>
  <div id="status"></div>
</div>
<script>
  let lastCode = null;

  async function refresh() {
    try {
      const res = await fetch('/qr/data');
      const data = await res.json();
      const container = document.getElementById('qr-container');
      const status = document.getElementById('status');

      if (data.status === 'connected') {
        container.innerHTML = '<span class="waiting">&#10003;</span>';
        status.textContent = 'Connected' + (data.phone ? ' as ' + data.phone : '');
        status.className = 'connected';
        return;
      }

      status.className = '';
      if (data.qr && data.qr !== lastCode) {
        lastCode = data.qr;
        container.innerHTML = '';
        const canvas = document.createElement('canvas');
        container.appendChild(canvas);
        QRCode.toCanvas(canvas, data.qr, { width: 260, margin: 1 });
        status.textContent = 'Scan with your phone';
      } else if (!data.qr) {
        status.textContent = 'Status: ' + data.status;
      }
    } catch (e) {
      document.getElementById('status').textContent = 'Bridge unreachable';
    }
  }

  refresh();
  setInterval(refresh, 2000);
</script>
</body>
</html>
"#;
