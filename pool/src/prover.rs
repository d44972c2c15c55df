//! Groth16 prover adapter.
//!
//! The prover itself is opaque: a [`ProverBackend`] turns a witness JSON
//! into a proof and public signals, typically by invoking the snarkjs
//! toolchain out of process. Proof generation takes seconds, so it runs on
//! a dedicated OS thread behind a message-passing [`ProverHandle`]:
//! submit a witness, receive progress events, then the result or error.
//! Cancellation kills the in-flight job without leaving partial state.
//!
//! Public signal order is fixed by the circuit:
//! `[newCommitmentHash, existingNullifierHash, withdrawnValue, stateRoot,
//!   stateTreeDepth, ASPRoot, ASPTreeDepth, context]`.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ark_bn254::Fr;
use ethers::types::U256;
use serde_json::{json, Value};

use crate::error::PoolError;
use crate::field::{field_to_u256, u256_to_field};
use crate::withdrawal::WithdrawalInputs;

/// Progress of an in-flight proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProverProgress {
    Loading,
    Proving,
    Done,
}

/// A Groth16 proof over BN254 in affine coordinates.
///
/// `b` rows are `[c0, c1]` as snarkjs emits them; the contract encoding
/// swaps each pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Groth16Proof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
}

impl Groth16Proof {
    /// Parse a snarkjs `proof.json`.
    pub fn from_snarkjs(value: &Value) -> Result<Self, PoolError> {
        let word = |v: &Value, what: &str| -> Result<U256, PoolError> {
            let s = v
                .as_str()
                .ok_or_else(|| PoolError::ProverFailure(format!("{what} is not a string")))?;
            U256::from_dec_str(s)
                .map_err(|_| PoolError::ProverFailure(format!("{what} is not a decimal word")))
        };
        Ok(Self {
            a: [
                word(&value["pi_a"][0], "pi_a[0]")?,
                word(&value["pi_a"][1], "pi_a[1]")?,
            ],
            b: [
                [
                    word(&value["pi_b"][0][0], "pi_b[0][0]")?,
                    word(&value["pi_b"][0][1], "pi_b[0][1]")?,
                ],
                [
                    word(&value["pi_b"][1][0], "pi_b[1][0]")?,
                    word(&value["pi_b"][1][1], "pi_b[1][1]")?,
                ],
            ],
            c: [
                word(&value["pi_c"][0], "pi_c[0]")?,
                word(&value["pi_c"][1], "pi_c[1]")?,
            ],
        })
    }

    /// Back to the snarkjs JSON layout (for external verification).
    pub fn to_snarkjs(&self) -> Value {
        json!({
            "pi_a": [self.a[0].to_string(), self.a[1].to_string(), "1"],
            "pi_b": [
                [self.b[0][0].to_string(), self.b[0][1].to_string()],
                [self.b[1][0].to_string(), self.b[1][1].to_string()],
                ["1", "0"],
            ],
            "pi_c": [self.c[0].to_string(), self.c[1].to_string(), "1"],
            "protocol": "groth16",
            "curve": "bn128",
        })
    }

    /// The eight uint256 words the verifier contract consumes:
    /// `[a.x, a.y, b.x[1], b.x[0], b.y[1], b.y[0], c.x, c.y]` - note the
    /// Fp2 limb swap on the G2 component for BN254.
    pub fn to_contract_words(&self) -> [U256; 8] {
        [
            self.a[0],
            self.a[1],
            self.b[0][1],
            self.b[0][0],
            self.b[1][1],
            self.b[1][0],
            self.c[0],
            self.c[1],
        ]
    }
}

/// Parse a snarkjs `public.json` (array of decimal strings).
pub fn parse_public_signals(value: &Value) -> Result<Vec<U256>, PoolError> {
    value
        .as_array()
        .ok_or_else(|| PoolError::ProverFailure("public signals are not an array".into()))?
        .iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| PoolError::ProverFailure("public signal is not a string".into()))?;
            U256::from_dec_str(s)
                .map_err(|_| PoolError::ProverFailure("public signal is not decimal".into()))
        })
        .collect()
}

/// Completed proof with the public values the contract call needs.
#[derive(Debug)]
pub struct ProofBundle {
    pub proof: Groth16Proof,
    pub public_signals: Vec<U256>,
    pub new_commitment_hash: Fr,
    pub existing_nullifier_hash: Fr,
}

/// The opaque proving system.
pub trait ProverBackend: Send {
    /// Produce a proof for the witness. Implementations poll `cancel` and
    /// return [`PoolError::ProverCancelled`] promptly when it is set.
    fn prove(
        &self,
        inputs: &Value,
        cancel: &AtomicBool,
    ) -> Result<(Groth16Proof, Vec<U256>), PoolError>;

    /// Local verification against the circuit's verification key.
    /// Test/diagnostic path; production submits to the chain verifier.
    fn verify(&self, proof: &Groth16Proof, public_signals: &[U256]) -> Result<bool, PoolError>;
}

// ---------------------------------------------------------------------------
// snarkjs subprocess backend
// ---------------------------------------------------------------------------

/// Out-of-process backend driving `snarkjs groth16 fullprove` / `verify`.
pub struct SnarkjsBackend {
    /// The snarkjs executable (usually just `snarkjs` on PATH).
    pub command: PathBuf,
    pub circuit_wasm: PathBuf,
    pub proving_key: PathBuf,
    pub verification_key: PathBuf,
    /// Scratch space for per-job files; each job gets its own directory.
    pub work_dir: PathBuf,
}

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SnarkjsBackend {
    fn job_dir(&self) -> Result<PathBuf, PoolError> {
        let id = JOB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = self
            .work_dir
            .join(format!("prove-{}-{}", std::process::id(), id));
        std::fs::create_dir_all(&dir)
            .map_err(|e| PoolError::ProverFailure(format!("cannot create work dir: {e}")))?;
        Ok(dir)
    }

    fn run_cancellable(
        &self,
        mut command: Command,
        cancel: &AtomicBool,
    ) -> Result<std::process::ExitStatus, PoolError> {
        let mut child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PoolError::ProverFailure(format!("cannot start prover: {e}")))?;
        loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PoolError::ProverCancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(PoolError::ProverFailure(e.to_string())),
            }
        }
    }

    fn read_json(path: &PathBuf) -> Result<Value, PoolError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PoolError::ProverFailure(format!("missing prover output: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| PoolError::ProverFailure(format!("malformed prover output: {e}")))
    }
}

impl ProverBackend for SnarkjsBackend {
    fn prove(
        &self,
        inputs: &Value,
        cancel: &AtomicBool,
    ) -> Result<(Groth16Proof, Vec<U256>), PoolError> {
        let dir = self.job_dir()?;
        let result = (|| {
            let input_path = dir.join("input.json");
            let proof_path = dir.join("proof.json");
            let public_path = dir.join("public.json");
            std::fs::write(&input_path, inputs.to_string())
                .map_err(|e| PoolError::ProverFailure(format!("cannot write witness: {e}")))?;

            let mut command = Command::new(&self.command);
            command
                .arg("groth16")
                .arg("fullprove")
                .arg(&input_path)
                .arg(&self.circuit_wasm)
                .arg(&self.proving_key)
                .arg(&proof_path)
                .arg(&public_path);
            let status = self.run_cancellable(command, cancel)?;
            if !status.success() {
                return Err(PoolError::ProverFailure(format!(
                    "prover exited with {status}"
                )));
            }

            let proof = Groth16Proof::from_snarkjs(&Self::read_json(&proof_path)?)?;
            let signals = parse_public_signals(&Self::read_json(&public_path)?)?;
            Ok((proof, signals))
        })();
        // witness files hold private inputs; always remove them
        let _ = std::fs::remove_dir_all(&dir);
        result
    }

    fn verify(&self, proof: &Groth16Proof, public_signals: &[U256]) -> Result<bool, PoolError> {
        let dir = self.job_dir()?;
        let result = (|| {
            let proof_path = dir.join("proof.json");
            let public_path = dir.join("public.json");
            std::fs::write(&proof_path, proof.to_snarkjs().to_string())
                .map_err(|e| PoolError::ProverFailure(e.to_string()))?;
            let signals: Vec<String> = public_signals.iter().map(|s| s.to_string()).collect();
            std::fs::write(&public_path, serde_json::to_string(&signals).unwrap_or_default())
                .map_err(|e| PoolError::ProverFailure(e.to_string()))?;

            let status = Command::new(&self.command)
                .arg("groth16")
                .arg("verify")
                .arg(&self.verification_key)
                .arg(&public_path)
                .arg(&proof_path)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| PoolError::ProverFailure(format!("cannot start verifier: {e}")))?;
            Ok(status.success())
        })();
        let _ = std::fs::remove_dir_all(&dir);
        result
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

struct ProofJob {
    inputs: Value,
    expected_new_commitment: U256,
    expected_nullifier_hash: U256,
    progress: mpsc::Sender<ProverProgress>,
    result: mpsc::Sender<Result<ProofBundle, PoolError>>,
    cancel: Arc<AtomicBool>,
}

enum WorkerMsg {
    Job(Box<ProofJob>),
    Shutdown,
}

/// Handle to the prover worker thread. One job runs at a time; the worker
/// owns the backend exclusively.
pub struct ProverHandle {
    tx: mpsc::Sender<WorkerMsg>,
    thread: Option<JoinHandle<()>>,
}

/// A submitted proof job: progress stream, result, cancellation.
pub struct ProofTask {
    progress: mpsc::Receiver<ProverProgress>,
    result: mpsc::Receiver<Result<ProofBundle, PoolError>>,
    cancel: Arc<AtomicBool>,
}

impl ProofTask {
    /// Request cancellation; the worker reports [`PoolError::ProverCancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Next progress event, blocking until one arrives or the job ends.
    pub fn next_progress(&self) -> Option<ProverProgress> {
        self.progress.recv().ok()
    }

    /// Block until the job completes.
    pub fn wait(self) -> Result<ProofBundle, PoolError> {
        self.result
            .recv()
            .unwrap_or_else(|_| Err(PoolError::ProverFailure("prover worker exited".into())))
    }
}

impl ProverHandle {
    /// Start the worker thread owning `backend`.
    pub fn spawn(backend: Box<dyn ProverBackend>) -> Self {
        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let thread = std::thread::spawn(move || worker_loop(backend, rx));
        Self {
            tx,
            thread: Some(thread),
        }
    }

    /// Queue a witness for proving.
    pub fn submit(&self, inputs: &WithdrawalInputs) -> ProofTask {
        let (progress_tx, progress_rx) = mpsc::channel();
        let (result_tx, result_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let job = ProofJob {
            inputs: inputs.witness.to_prover_inputs(),
            expected_new_commitment: field_to_u256(&inputs.new_commitment_hash),
            expected_nullifier_hash: field_to_u256(&inputs.existing_nullifier_hash),
            progress: progress_tx,
            result: result_tx,
            cancel: cancel.clone(),
        };
        // if the worker is gone the job (and its result sender) is dropped
        // here, and wait() surfaces the failure
        let _ = self.tx.send(WorkerMsg::Job(Box::new(job)));
        ProofTask {
            progress: progress_rx,
            result: result_rx,
            cancel,
        }
    }
}

impl Drop for ProverHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(backend: Box<dyn ProverBackend>, rx: mpsc::Receiver<WorkerMsg>) {
    while let Ok(msg) = rx.recv() {
        let job = match msg {
            WorkerMsg::Job(job) => job,
            WorkerMsg::Shutdown => break,
        };
        let _ = job.progress.send(ProverProgress::Loading);
        if job.cancel.load(Ordering::SeqCst) {
            let _ = job.result.send(Err(PoolError::ProverCancelled));
            continue;
        }
        let _ = job.progress.send(ProverProgress::Proving);
        let outcome = backend
            .prove(&job.inputs, &job.cancel)
            .and_then(|(proof, signals)| finish_bundle(&job, proof, signals));
        if outcome.is_ok() {
            let _ = job.progress.send(ProverProgress::Done);
        }
        let _ = job.result.send(outcome);
    }
}

fn finish_bundle(
    job: &ProofJob,
    proof: Groth16Proof,
    public_signals: Vec<U256>,
) -> Result<ProofBundle, PoolError> {
    if public_signals.len() < 2 {
        return Err(PoolError::ProverFailure(format!(
            "expected 8 public signals, got {}",
            public_signals.len()
        )));
    }
    if public_signals[0] != job.expected_new_commitment
        || public_signals[1] != job.expected_nullifier_hash
    {
        return Err(PoolError::ProverFailure(
            "public signals do not match the submitted witness".into(),
        ));
    }
    Ok(ProofBundle {
        new_commitment_hash: u256_to_field(public_signals[0])?,
        existing_nullifier_hash: u256_to_field(public_signals[1])?,
        proof,
        public_signals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proof() -> Groth16Proof {
        Groth16Proof {
            a: [U256::from(1u64), U256::from(2u64)],
            b: [
                [U256::from(3u64), U256::from(4u64)],
                [U256::from(5u64), U256::from(6u64)],
            ],
            c: [U256::from(7u64), U256::from(8u64)],
        }
    }

    #[test]
    fn test_contract_words_swap_g2_limbs() {
        let words = sample_proof().to_contract_words();
        let expected: Vec<U256> = [1u64, 2, 4, 3, 6, 5, 7, 8]
            .iter()
            .map(|v| U256::from(*v))
            .collect();
        assert_eq!(words.to_vec(), expected);
    }

    #[test]
    fn test_snarkjs_round_trip() {
        let proof = sample_proof();
        let parsed = Groth16Proof::from_snarkjs(&proof.to_snarkjs()).unwrap();
        assert_eq!(proof, parsed);
    }

    #[test]
    fn test_parse_public_signals() {
        let value = json!(["1", "2", "42"]);
        let signals = parse_public_signals(&value).unwrap();
        assert_eq!(signals, vec![U256::from(1u64), U256::from(2u64), U256::from(42u64)]);

        assert!(parse_public_signals(&json!("nope")).is_err());
        assert!(parse_public_signals(&json!([1, 2])).is_err());
    }

    // -- worker ----------------------------------------------------------

    struct StaticBackend {
        signals: Vec<U256>,
    }

    impl ProverBackend for StaticBackend {
        fn prove(
            &self,
            _inputs: &Value,
            _cancel: &AtomicBool,
        ) -> Result<(Groth16Proof, Vec<U256>), PoolError> {
            Ok((sample_proof(), self.signals.clone()))
        }

        fn verify(&self, _p: &Groth16Proof, _s: &[U256]) -> Result<bool, PoolError> {
            Ok(true)
        }
    }

    /// Blocks until cancelled, like a long snarkjs run.
    struct BlockingBackend;

    impl ProverBackend for BlockingBackend {
        fn prove(
            &self,
            _inputs: &Value,
            cancel: &AtomicBool,
        ) -> Result<(Groth16Proof, Vec<U256>), PoolError> {
            while !cancel.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(PoolError::ProverCancelled)
        }

        fn verify(&self, _p: &Groth16Proof, _s: &[U256]) -> Result<bool, PoolError> {
            Ok(true)
        }
    }

    fn sample_inputs() -> WithdrawalInputs {
        use crate::commitment::{commitment_hash, deposit_secrets};
        use crate::field::u256_to_field;
        use crate::keys::MasterKeys;
        use crate::merkle::LeanImt;
        use crate::recovery::ActiveDeposit;
        use crate::withdrawal::{build_withdrawal, WithdrawalRequest};
        use ethers::types::{Address, Bytes, H256};
        use std::collections::BTreeSet;

        let keys = MasterKeys::from_scalars(Fr::from(1u64), Fr::from(2u64));
        let scope = Fr::from(0x10u64);
        let label = Fr::from(0xAu64);
        let value = U256::from(1_000u64);
        let secrets = deposit_secrets(&keys, scope, 0);
        let commitment = commitment_hash(
            u256_to_field(value).unwrap(),
            label,
            secrets.precommitment_hash,
        );
        let state_tree = LeanImt::from_leaves([commitment]);
        let asp_tree = LeanImt::from_leaves([label]);
        let deposit = ActiveDeposit {
            index: 0,
            nullifier: secrets.nullifier,
            secret: secrets.secret,
            precommitment_hash: secrets.precommitment_hash,
            value,
            label,
            block_number: 1,
            tx_hash: H256::zero(),
            commitment_hash: commitment,
        };
        build_withdrawal(
            &keys,
            &deposit,
            U256::from(100u64),
            &state_tree,
            &asp_tree.proof_of(&label).unwrap(),
            &WithdrawalRequest {
                processooor: Address::repeat_byte(0x11),
                data: Bytes::new(),
            },
            scope,
            &BTreeSet::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_worker_happy_path_and_progress_order() {
        let inputs = sample_inputs();
        let signals = vec![
            field_to_u256(&inputs.new_commitment_hash),
            field_to_u256(&inputs.existing_nullifier_hash),
            U256::from(100u64),
        ];
        let handle = ProverHandle::spawn(Box::new(StaticBackend { signals }));
        let task = handle.submit(&inputs);

        assert_eq!(task.next_progress(), Some(ProverProgress::Loading));
        assert_eq!(task.next_progress(), Some(ProverProgress::Proving));
        assert_eq!(task.next_progress(), Some(ProverProgress::Done));

        let bundle = task.wait().unwrap();
        assert_eq!(bundle.new_commitment_hash, inputs.new_commitment_hash);
        assert_eq!(
            bundle.existing_nullifier_hash,
            inputs.existing_nullifier_hash
        );
    }

    #[test]
    fn test_worker_rejects_mismatched_signals() {
        let inputs = sample_inputs();
        let handle = ProverHandle::spawn(Box::new(StaticBackend {
            signals: vec![U256::from(1u64), U256::from(2u64)],
        }));
        let err = handle.submit(&inputs).wait().unwrap_err();
        assert!(matches!(err, PoolError::ProverFailure(_)));
    }

    #[test]
    fn test_cancellation_surfaces_cleanly() {
        let inputs = sample_inputs();
        let handle = ProverHandle::spawn(Box::new(BlockingBackend));
        let task = handle.submit(&inputs);
        task.cancel();
        let err = task.wait().unwrap_err();
        assert!(matches!(err, PoolError::ProverCancelled));
    }
}
