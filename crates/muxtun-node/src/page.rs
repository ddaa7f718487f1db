//! The embedded relay page.
//!
//! The page is the tunnel's transport: it opens one WebSocket back to the
//! Initiator and one to the Acceptor and forwards every message between
//! them, counting bytes as it goes. When the local leg drops it retries
//! after a second, which is what re-attaches the tunnel after an Initiator
//! restart.

use muxtun_core::defaults::{ACCEPTOR_WS_PATH, INITIATOR_WS_PATH};
use muxtun_core::PROJECT_NAME;

const PAGE_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8" />
  <title>__NAME__</title>
  <style>
    body { font-family: sans-serif; display: flex; align-items: center;
           justify-content: center; height: 100vh; margin: 0; }
    .container { text-align: center; }
    h1 { font-size: 3em; margin: 0.5em 0; }
    .status { font-size: 1.2em; margin: 1em 0; }
    .info { margin: 2em 0; line-height: 1.8; }
    .up { color: #4f4; }
    .down { color: #f44; }
  </style>
</head>
<body>
  <div class="container">
    <h1>__NAME__</h1>
    <div class="status">
      Local: <span id="localStatus" class="down">Connecting...</span><br>
      Remote: <span id="remoteStatus" class="down">Waiting...</span>
    </div>
    <div class="info">
      <div>SOCKS5: 127.0.0.1:__PROXY_PORT__</div>
      <div>Sent: <span id="sent">0 B</span></div>
      <div>Received: <span id="received">0 B</span></div>
    </div>
  </div>

  <script>
    const remoteBase = '__SERVER_URL__';
    let sent = 0;
    let received = 0;

    function formatBytes(n) {
      if (n === 0) return '0 B';
      const units = ['B', 'KB', 'MB', 'GB', 'TB'];
      const i = Math.floor(Math.log(n) / Math.log(1024));
      return (n / Math.pow(1024, i)).toFixed(2) + ' ' + units[i];
    }

    function updateCounters() {
      document.getElementById('sent').textContent = formatBytes(sent);
      document.getElementById('received').textContent = formatBytes(received);
    }

    function setStatus(id, up) {
      const el = document.getElementById(id);
      el.textContent = up ? 'Connected' : 'Disconnected';
      el.className = up ? 'up' : 'down';
    }

    function connect() {
      const localWS = new WebSocket('ws://' + location.host + '__LOCAL_PATH__');
      localWS.binaryType = 'arraybuffer';

      localWS.onopen = function() {
        setStatus('localStatus', true);

        const remoteWS = new WebSocket(remoteBase + '__REMOTE_PATH__');
        remoteWS.binaryType = 'arraybuffer';

        remoteWS.onopen = function() {
          setStatus('remoteStatus', true);

          localWS.onmessage = function(event) {
            if (remoteWS.readyState === WebSocket.OPEN) {
              remoteWS.send(event.data);
              sent += event.data.byteLength || 0;
              updateCounters();
            }
          };

          remoteWS.onmessage = function(event) {
            if (localWS.readyState === WebSocket.OPEN) {
              localWS.send(event.data);
              received += event.data.byteLength || 0;
              updateCounters();
            }
          };
        };

        remoteWS.onerror = function() {
          setStatus('remoteStatus', false);
        };

        remoteWS.onclose = function() {
          setStatus('remoteStatus', false);
          if (localWS.readyState === WebSocket.OPEN) {
            localWS.close();
          }
        };
      };

      localWS.onerror = function() {
        setStatus('localStatus', false);
      };

      localWS.onclose = function() {
        setStatus('localStatus', false);
        setStatus('remoteStatus', false);
        setTimeout(connect, 1000);
      };
    }

    connect();
  </script>
</body>
</html>
"#;

/// Render the relay page for a given Acceptor base URL and SOCKS5 port.
pub fn render(server_url: &str, proxy_port: u16) -> String {
    PAGE_TEMPLATE
        .replace("__NAME__", PROJECT_NAME)
        .replace("__SERVER_URL__", server_url)
        .replace("__PROXY_PORT__", &proxy_port.to_string())
        .replace("__LOCAL_PATH__", INITIATOR_WS_PATH)
        .replace("__REMOTE_PATH__", ACCEPTOR_WS_PATH)
}
