//! Shared fixtures: fake tool servers implemented as `sh` scripts.
//!
//! Each script speaks the real wire protocol over its stdio, so the tests
//! exercise the genuine spawn → handshake → framed-stream path. Scripts
//! answer the readiness probe first; their behaviour afterwards is the
//! scenario under test.

use std::path::PathBuf;

use tempfile::TempDir;

use toolbridge::config::{BridgeConfig, RetryConfig, TimeoutConfig};

/// Answers every request with a nested payload echoing the operation name.
pub const ECHO_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  name=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
  if [ "$id" = "connection-test" ]; then
    printf '{"id":"connection-test","result":{"tools":[]}}\n'
  else
    printf '{"id":"%s","result":{"content":[{"text":"{\\"op\\":\\"%s\\"}"}]}}\n' "$id" "$name"
  fi
done
"#;

/// Reads two requests, then answers them in reverse order.
pub const SWAP_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
IFS= read -r first
IFS= read -r second
for line in "$second" "$first"; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  name=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
  printf '{"id":"%s","result":{"content":[{"text":"{\\"op\\":\\"%s\\"}"}]}}\n' "$id" "$name"
done
while IFS= read -r line; do :; done
"#;

/// Completes the handshake, then swallows every request.
pub const SILENT_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
while IFS= read -r line; do :; done
"#;

/// Emits a garbage line and a response under an unknown id before the real
/// response.
pub const NOISY_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
IFS= read -r req
id=$(printf '%s' "$req" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
printf 'this is not json\n'
printf '{"id":"ghost-0000","result":{"content":[{"text":"{\\"wrong\\":true}"}]}}\n'
printf '{"id":"%s","result":{"content":[{"text":"{\\"right\\":true}"}]}}\n' "$id"
while IFS= read -r line; do :; done
"#;

/// Consumes two requests, then dies with exit code 1 leaving both pending.
pub const DYING_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
IFS= read -r first
IFS= read -r second
exit 1
"#;

/// Answers the first request only after a one-second delay, then echoes
/// normally — for exercising late responses to already-timed-out requests.
pub const LATE_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
IFS= read -r req
id=$(printf '%s' "$req" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
sleep 1
printf '{"id":"%s","result":{"content":[{"text":"{\\"late\\":true}"}]}}\n' "$id"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  name=$(printf '%s' "$line" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
  printf '{"id":"%s","result":{"content":[{"text":"{\\"op\\":\\"%s\\"}"}]}}\n' "$id" "$name"
done
"#;

/// Rejects every request with an error envelope.
pub const ERROR_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  printf '{"id":"%s","error":{"message":"operation rejected","code":-32000}}\n' "$id"
done
"#;

/// Answers with a plain result carrying no nested content document.
pub const PLAIN_RESULT_SERVER: &str = r#"#!/bin/sh
IFS= read -r probe
printf '{"id":"connection-test","result":{"tools":[]}}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  printf '{"id":"%s","result":{"status":"ok"}}\n' "$id"
done
"#;

/// Exits immediately — the handshake can never complete.
pub const NEVER_READY_SERVER: &str = "#!/bin/sh\nexit 7\n";

/// A fake tool server on disk. Keep the value alive for the duration of the
/// test — reconnection re-runs the script from the same path.
pub struct FakeServer {
    _dir: TempDir,
    script: PathBuf,
}

impl FakeServer {
    /// Write `body` as a shell script in a fresh temp directory.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let script = dir.path().join("tool-server.sh");
        std::fs::write(&script, body).expect("write fake server script");
        Self { _dir: dir, script }
    }

    /// Bridge configuration pointing at this script, with test-friendly
    /// timings: fast retries, generous request deadline.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            server_command: "sh".to_owned(),
            server_args: vec![self.script.to_string_lossy().into_owned()],
            timeouts: TimeoutConfig {
                request_ms: 5_000,
                handshake_ms: 5_000,
            },
            retry: RetryConfig {
                max_attempts: 5,
                base_delay_ms: 50,
                max_delay_ms: 400,
            },
        }
    }
}
