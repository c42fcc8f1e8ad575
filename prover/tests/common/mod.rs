//! Shared test helpers for prover integration tests.
//!
//! - `MockEngine`: a `ProvingEngine` whose proofs are blake3 commitments
//! - `PatternFetcher`: an in-memory transcript with deterministic bytes
//! - `serve_transcript`: the same transcript over HTTP on a local port
//! - `wasm_engine`: a WAT composer driven through the real sandbox

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use proofbridge_interop::{BridgeError, EngineFault, HostException};
use proofbridge_prover::crs::{g1_range, CrsRange, RangeFetcher, HEADER_SIZE, POINT_SIZE};
use proofbridge_prover::{ConstraintSystem, CrsError, HttpFetcher, ProvingEngine};
use proofbridge_sandbox::{ComposerId, EngineConfig, KeyId, Sandbox, SandboxError, WasmEngine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Transcript contents at `offset`.
pub fn transcript_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

pub fn transcript_bytes(range: CrsRange) -> Vec<u8> {
    (range.offset..=range.end()).map(transcript_byte).collect()
}

/// A constraint system declaring `gates` gates in its first four bytes.
pub fn constraint_system(gates: u32) -> ConstraintSystem {
    let mut bytes = gates.to_le_bytes().to_vec();
    bytes.extend_from_slice(b"circuit");
    ConstraintSystem::from_bytes(bytes)
}

// ── Mock engine ──

const PROOF_TAG: &[u8] = b"mock-proof";

fn thrown(message: &str) -> SandboxError {
    SandboxError::Bridge(BridgeError::Thrown(HostException::error(message)))
}

fn fault(message: &str) -> SandboxError {
    SandboxError::Bridge(BridgeError::Fault(EngineFault::new(message)))
}

/// In-process composer. A proof is `PROOF_TAG || blake3(cs || witness)`,
/// so it verifies exactly against the witness it was made from.
#[derive(Debug, Default)]
pub struct MockEngine {
    next_id: u32,
    composers: BTreeMap<u32, Vec<u8>>,
    keys: BTreeSet<u32>,
    pub freed_composers: Vec<u32>,
    pub freed_keys: Vec<u32>,
    pub calls: Vec<&'static str>,
    /// Fault on the next call named here.
    pub fault_on: Option<&'static str>,
}

impl MockEngine {
    fn enter(&mut self, name: &'static str) -> Result<(), SandboxError> {
        self.calls.push(name);
        if self.fault_on == Some(name) {
            self.fault_on = None;
            return Err(fault("wasm trap: unreachable"));
        }
        Ok(())
    }

    fn circuit(&self, composer: ComposerId) -> Result<&[u8], SandboxError> {
        self.composers
            .get(&composer.0)
            .map(Vec::as_slice)
            .ok_or_else(|| thrown("unknown composer"))
    }

    fn commitment(&self, composer: ComposerId, witness: &[u8]) -> Result<Vec<u8>, SandboxError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.circuit(composer)?);
        hasher.update(witness);
        let mut proof = PROOF_TAG.to_vec();
        proof.extend_from_slice(hasher.finalize().as_bytes());
        Ok(proof)
    }

    fn new_key(&mut self) -> KeyId {
        self.next_id += 1;
        self.keys.insert(self.next_id);
        KeyId(self.next_id)
    }

    pub fn live_keys(&self) -> usize {
        self.keys.len()
    }
}

impl ProvingEngine for MockEngine {
    fn composer_new(&mut self, constraint_system: &[u8]) -> Result<ComposerId, SandboxError> {
        self.enter("composer_new")?;
        if constraint_system.len() < 4 {
            return Err(thrown("constraint system too short"));
        }
        self.next_id += 1;
        self.composers.insert(self.next_id, constraint_system.to_vec());
        Ok(ComposerId(self.next_id))
    }

    fn composer_free(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        self.enter("composer_free")?;
        self.composers.remove(&composer.0);
        self.freed_composers.push(composer.0);
        Ok(())
    }

    fn key_free(&mut self, key: KeyId) -> Result<(), SandboxError> {
        self.enter("key_free")?;
        self.keys.remove(&key.0);
        self.freed_keys.push(key.0);
        Ok(())
    }

    fn circuit_size(&mut self, composer: ComposerId) -> Result<u32, SandboxError> {
        self.enter("circuit_size")?;
        let cs = self.circuit(composer)?;
        Ok(u32::from_le_bytes([cs[0], cs[1], cs[2], cs[3]]))
    }

    fn init_reference_data(
        &mut self,
        composer: ComposerId,
        size: u32,
        g1: &[u8],
        g2: &[u8],
    ) -> Result<(), SandboxError> {
        self.enter("init_reference_data")?;
        self.circuit(composer)?;
        if g1.len() as u64 != g1_range(u64::from(size)).length || g2.len() != 128 {
            return Err(thrown("reference data does not match circuit"));
        }
        Ok(())
    }

    fn create_multiscalar_setup(&mut self, composer: ComposerId) -> Result<(), SandboxError> {
        self.enter("create_multiscalar_setup")?;
        self.circuit(composer).map(|_| ())
    }

    fn compute_proving_key(&mut self, composer: ComposerId) -> Result<KeyId, SandboxError> {
        self.enter("compute_proving_key")?;
        self.circuit(composer)?;
        Ok(self.new_key())
    }

    fn compute_verification_key(
        &mut self,
        composer: ComposerId,
        proving_key: KeyId,
    ) -> Result<KeyId, SandboxError> {
        self.enter("compute_verification_key")?;
        self.circuit(composer)?;
        if !self.keys.contains(&proving_key.0) {
            return Err(thrown("unknown proving key"));
        }
        Ok(self.new_key())
    }

    fn create_proof(
        &mut self,
        composer: ComposerId,
        _proving_key: KeyId,
        witness: &[u8],
    ) -> Result<Vec<u8>, SandboxError> {
        self.enter("create_proof")?;
        self.commitment(composer, witness)
    }

    fn verify(
        &mut self,
        composer: ComposerId,
        _verification_key: KeyId,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<bool, SandboxError> {
        self.enter("verify")?;
        if !proof.starts_with(PROOF_TAG) {
            return Err(thrown("malformed proof"));
        }
        Ok(proof == self.commitment(composer, public_inputs)?.as_slice())
    }
}

// ── Transcript sources ──

/// Serves any range of a virtual transcript and records the requests.
#[derive(Debug, Clone, Default)]
pub struct PatternFetcher {
    requests: Arc<Mutex<Vec<CrsRange>>>,
    /// Manifest bytes served for `[0, 28)`.
    pub manifest: Option<Vec<u8>>,
}

impl PatternFetcher {
    pub fn with_manifest(manifest: Vec<u8>) -> Self {
        Self {
            manifest: Some(manifest),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CrsRange> {
        self.requests.lock().unwrap().clone()
    }
}

impl RangeFetcher for PatternFetcher {
    async fn fetch(&self, range: CrsRange) -> Result<Vec<u8>, CrsError> {
        self.requests.lock().unwrap().push(range);
        if range.offset == 0 && range.length == HEADER_SIZE {
            if let Some(manifest) = &self.manifest {
                return Ok(manifest.clone());
            }
        }
        Ok(transcript_bytes(range))
    }

    fn source(&self) -> &str {
        "pattern"
    }
}

/// An HTTP fetcher that never goes through a proxy.
pub fn http_fetcher(url: impl Into<String>) -> HttpFetcher {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpFetcher::with_client(client, url)
}

pub fn manifest_bytes(num_g1_points: u32) -> Vec<u8> {
    [0u32, 20, 100_800_000, 1, num_g1_points, 2, 0]
        .iter()
        .flat_map(|field| field.to_be_bytes())
        .collect()
}

/// How the test server answers range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    /// 206 with exactly the requested bytes.
    Partial,
    /// 200, as a server ignoring `Range` would.
    IgnoreRange,
    /// 206 with the last byte missing.
    Short,
    /// 206 declaring a body far larger than the range.
    Oversized,
}

fn requested_range(request: &str) -> Option<CrsRange> {
    let line = request
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("range:"))?;
    let spec = line.split_once("bytes=")?.1.trim();
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    Some(CrsRange {
        offset: start,
        length: end - start + 1,
    })
}

/// Serve the virtual transcript on a local port. Returns the transcript
/// URL and the ranges requested so far.
pub async fn serve_transcript(mode: ServeMode) -> (String, Arc<Mutex<Vec<CrsRange>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&chunk[..n]);
                }
                let range = requested_range(&String::from_utf8_lossy(&request))
                    .unwrap_or(CrsRange { offset: 0, length: 1 });
                log.lock().unwrap().push(range);

                let mut body = transcript_bytes(range);
                let mut declared = body.len() as u64;
                let status = match mode {
                    ServeMode::Partial => "206 Partial Content",
                    ServeMode::IgnoreRange => "200 OK",
                    ServeMode::Short => {
                        body.pop();
                        declared -= 1;
                        "206 Partial Content"
                    }
                    ServeMode::Oversized => {
                        declared = 1 << 30;
                        "206 Partial Content"
                    }
                };
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status, declared
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                // The client may hang up once it has seen the headers.
                socket.write_all(&body).await.ok();
                socket.shutdown().await.ok();
            });
        }
    });

    (format!("http://{}/transcript00.dat", addr), seen)
}

/// Write a sparse transcript file holding the virtual transcript's bytes
/// in `ranges` and zeros elsewhere, `len` bytes long.
pub fn write_transcript_file(name: &str, len: u64, ranges: &[CrsRange]) -> std::path::PathBuf {
    use std::io::{Seek, SeekFrom, Write};

    let path = std::env::temp_dir().join(format!("proofbridge-{}-{}.dat", name, std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.set_len(len).unwrap();
    for range in ranges {
        file.seek(SeekFrom::Start(range.offset)).unwrap();
        file.write_all(&transcript_bytes(*range)).unwrap();
    }
    path
}

pub fn g1_points(n: u64) -> u64 {
    (n + 1) * POINT_SIZE
}

// ── WAT engine ──

/// A composer written in WAT. The constraint system's first four bytes
/// (little-endian) are the gate count; the proof is the witness itself and
/// verification compares it byte for byte with the public inputs.
const COMPOSER_WAT: &str = r#"
(module
    (import "proofbridge_host" "error_new" (func $error_new (param i32 i32) (result i32)))

    (memory (export "memory") 1)
    (global $sp (mut i32) (i32.const 16384))
    (global $heap (mut i32) (i32.const 16384))
    (global $exn (mut i32) (i32.const 0))

    (data (i32.const 256) "reference data does not match circuit")

    (func $malloc (export "__pb_malloc") (param $size i32) (result i32)
        (local $ptr i32) (local $end i32) (local $limit i32)
        (local.set $ptr (global.get $heap))
        (local.set $end
            (i32.add (local.get $ptr)
                (i32.and (i32.add (local.get $size) (i32.const 7)) (i32.const -8))))
        (local.set $limit (i32.mul (memory.size) (i32.const 65536)))
        (if (i32.gt_u (local.get $end) (local.get $limit))
            (then
                (if (i32.eq
                        (memory.grow
                            (i32.add
                                (i32.shr_u (i32.sub (local.get $end) (local.get $limit)) (i32.const 16))
                                (i32.const 1)))
                        (i32.const -1))
                    (then unreachable))))
        (global.set $heap (local.get $end))
        (local.get $ptr))

    (func (export "__pb_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
        (local $out i32)
        (local.set $out (call $malloc (local.get $new)))
        (memory.copy
            (local.get $out)
            (local.get $ptr)
            (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
        (local.get $out))

    (func (export "__pb_free") (param i32 i32))

    (func (export "__pb_add_to_stack_pointer") (param $delta i32) (result i32)
        (global.set $sp (i32.add (global.get $sp) (local.get $delta)))
        (global.get $sp))

    (func (export "__pb_exn_store") (param $h i32)
        (global.set $exn (local.get $h)))

    (func $ok (param $ret i32) (param $offset i32)
        (i32.store (i32.add (local.get $ret) (local.get $offset)) (i32.const 0))
        (i32.store (i32.add (local.get $ret) (i32.add (local.get $offset) (i32.const 4))) (i32.const 0)))

    ;; The composer is the constraint system buffer, which is never freed.
    (func (export "composer_new") (param $ptr i32) (param $len i32) (result i32)
        (if (i32.lt_u (local.get $len) (i32.const 4)) (then unreachable))
        (local.get $ptr))

    (func (export "composer_free") (param i32))
    (func (export "key_free") (param i32))

    (func (export "composer_circuit_size") (param $composer i32) (result i32)
        (i32.load (local.get $composer)))

    (func (export "composer_init_reference_data")
        (param $ret i32) (param $composer i32) (param $size i32)
        (param $g1 i32) (param $g1_len i32) (param $g2 i32) (param $g2_len i32)
        (if (i32.or
                (i32.ne (local.get $g1_len)
                    (i32.mul (i32.add (local.get $size) (i32.const 1)) (i32.const 64)))
                (i32.ne (local.get $g2_len) (i32.const 128)))
            (then
                (i32.store (local.get $ret) (call $error_new (i32.const 256) (i32.const 37)))
                (i32.store offset=4 (local.get $ret) (i32.const 1)))
            (else (call $ok (local.get $ret) (i32.const 0)))))

    (func (export "composer_create_multiscalar_setup") (param $ret i32) (param i32)
        (call $ok (local.get $ret) (i32.const 0)))

    (func (export "composer_compute_proving_key") (param $ret i32) (param i32)
        (i32.store (local.get $ret) (i32.const 1))
        (call $ok (local.get $ret) (i32.const 4)))

    (func (export "composer_compute_verification_key") (param $ret i32) (param i32) (param i32)
        (i32.store (local.get $ret) (i32.const 2))
        (call $ok (local.get $ret) (i32.const 4)))

    (func (export "composer_create_proof")
        (param $ret i32) (param i32) (param i32) (param $ptr i32) (param $len i32)
        (i32.store (local.get $ret) (local.get $ptr))
        (i32.store offset=4 (local.get $ret) (local.get $len))
        (call $ok (local.get $ret) (i32.const 8)))

    (func (export "composer_verify")
        (param $ret i32) (param i32) (param i32)
        (param $proof i32) (param $proof_len i32) (param $pub i32) (param $pub_len i32)
        (local $i i32) (local $equal i32)
        (local.set $equal (i32.eq (local.get $proof_len) (local.get $pub_len)))
        (block $done
            (loop $next
                (br_if $done (i32.eqz (local.get $equal)))
                (br_if $done (i32.ge_u (local.get $i) (local.get $proof_len)))
                (local.set $equal
                    (i32.eq
                        (i32.load8_u (i32.add (local.get $proof) (local.get $i)))
                        (i32.load8_u (i32.add (local.get $pub) (local.get $i)))))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $next)))
        (i32.store (local.get $ret) (local.get $equal))
        (call $ok (local.get $ret) (i32.const 4)))
)
"#;

pub fn wasm_engine() -> WasmEngine {
    Sandbox::new(COMPOSER_WAT, EngineConfig::default())
        .unwrap()
        .instantiate()
        .unwrap()
}
