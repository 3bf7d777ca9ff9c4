use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use vid_slicer_core::error::AppError;
use vid_slicer_core::ffmpeg::FfmpegEngine;
use vid_slicer_core::job::{CancelHandle, JobStatus};
use vid_slicer_core::options::SliceOptions;
use vid_slicer_core::sidecar_api::{self, SidecarEventEmitter, SliceEvent};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    job_id: u64,
    cancel: Option<CancelHandle>,
}

/// At most one slicing job at a time.
#[derive(Clone)]
struct JobSlot {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<u64, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = guard.as_ref() {
            return Err(AppError::from(format!(
                "Another slicing job is already running (jobId={})",
                existing.job_id
            )));
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        *guard = Some(ActiveJob {
            job_id,
            cancel: None,
        });
        Ok(job_id)
    }

    /// Attach the cancel handle once the job is built. False if the job was
    /// cancelled while still probing.
    fn attach_cancel(&self, job_id: u64, handle: CancelHandle) -> bool {
        let mut guard = self.active_job.lock();
        match guard.as_mut() {
            Some(active) if active.job_id == job_id => {
                active.cancel = Some(handle);
                true
            }
            _ => false,
        }
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if guard.as_ref().is_some_and(|a| a.job_id == job_id) {
            *guard = None;
        }
    }

    fn current_job(&self) -> Option<ActiveJob> {
        self.active_job.lock().clone()
    }

    /// Cancel and release the slot. A job still probing is detected by
    /// `attach_cancel` failing.
    fn cancel_current(&self) -> Option<u64> {
        let active = self.active_job.lock().take()?;
        if let Some(handle) = active.cancel {
            handle.cancel();
        }
        Some(active.job_id)
    }
}

struct ActiveJobGuard {
    slot: JobSlot,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.slot.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
        #[serde(default)]
        options: SliceOptions,
    },
    AudioTracks {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
        #[serde(default)]
        options: SliceOptions,
    },
    Plan {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
        #[serde(default)]
        options: SliceOptions,
    },
    CommandPreview {
        #[serde(default)]
        options: SliceOptions,
        #[serde(rename = "inputPath")]
        input_path: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaSliceParams {
    input_path: PathBuf,
    #[serde(default)]
    options: SliceOptions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaCancelParams {
    job_id: Option<u64>,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_slice_event(writer: &SharedWriter, job_id: u64, event: SliceEvent) {
    let (name, payload) = match event {
        SliceEvent::Progress {
            percent,
            segment_index,
        } => (
            "media.job.progress",
            json!({ "jobId": job_id, "percent": percent, "segmentIndex": segment_index }),
        ),
        SliceEvent::Segment(report) => (
            "media.job.segment",
            json!({ "jobId": job_id, "segment": report }),
        ),
        SliceEvent::Stall(warning) => (
            "media.job.stall",
            json!({
                "jobId": job_id,
                "segmentIndex": warning.segment_index,
                "silentSecs": warning.silent_secs,
                "message": warning.to_string(),
            }),
        ),
    };
    emit_rpc_event(writer, name, payload);
}

fn emit_job_error(writer: &SharedWriter, job_id: u64, error: &RpcErrorPayload) {
    emit_rpc_event(
        writer,
        "media.job.error",
        json!({
            "jobId": job_id,
            "summary": error.summary,
            "detail": error.detail,
        }),
    );
}

fn emit_job_complete(writer: &SharedWriter, job_id: u64, result: &Value) {
    emit_rpc_event(
        writer,
        "media.job.complete",
        json!({
            "jobId": job_id,
            "result": result,
        }),
    );
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    let (summary, detail) = err.summary_and_detail();
    RpcErrorPayload { summary, detail }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn is_async_request(method: &str) -> bool {
    method == "media.slice"
}

fn dispatch_sync(method: &str, params: Value, jobs: &JobSlot) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_value(sidecar_api::app_capabilities(), "app capabilities"),
        "media.inspect" => {
            let parsed: MediaInspectParams = params_from_value(params)?;
            match parsed {
                MediaInspectParams::Metadata {
                    input_path,
                    options,
                } => to_value(sidecar_api::get_media_info(input_path, options)?, "metadata"),
                MediaInspectParams::AudioTracks {
                    input_path,
                    options,
                } => to_value(
                    sidecar_api::list_audio_tracks(input_path, options),
                    "audio tracks",
                ),
                MediaInspectParams::Plan {
                    input_path,
                    options,
                } => to_value(sidecar_api::preview_plan(input_path, options)?, "plan"),
                MediaInspectParams::CommandPreview {
                    options,
                    input_path,
                } => Ok(Value::String(sidecar_api::preview_slice_command(
                    options, input_path,
                ))),
            }
        }
        "media.cancel" => {
            let parsed: MediaCancelParams = params_from_value(params)?;
            match (jobs.current_job(), parsed.job_id) {
                (None, Some(job_id)) => Err(AppError::from(format!("Unknown jobId: {}", job_id))),
                (None, None) => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
                (Some(active), Some(job_id)) if active.job_id != job_id => {
                    Err(AppError::from(format!("Unknown jobId: {}", job_id)))
                }
                (Some(_), _) => {
                    let job_id = jobs.cancel_current();
                    Ok(json!({ "cancelled": job_id.is_some(), "jobId": job_id }))
                }
            }
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

fn write_response(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let response = match result {
        Ok(result) => serde_json::to_value(RpcSuccess { id, result })
            .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => serde_json::to_value(RpcFailure {
            id,
            error: parse_error_payload(&err),
        })
        .map_err(|e| io::Error::other(format!("serialize failure: {}", e))),
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id,
                error: RpcErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn handle_sync_request(request: RpcRequest, writer: &SharedWriter, jobs: &JobSlot) {
    let result = dispatch_sync(&request.method, request.params, jobs);
    write_response(writer, request.id, result);
}

fn run_slice(params: MediaSliceParams, job_id: u64, writer: &SharedWriter, jobs: &JobSlot) -> Result<Value, AppError> {
    let mut prepared = sidecar_api::prepare_slice(params.input_path, &params.options)?;
    if !jobs.attach_cancel(job_id, prepared.job.cancel_handle()) {
        return Err(AppError::Aborted);
    }

    let writer_for_events = Arc::clone(writer);
    let emitter: SidecarEventEmitter =
        Arc::new(move |event| emit_slice_event(&writer_for_events, job_id, event));
    let result =
        sidecar_api::run_prepared_slice(&mut prepared, &FfmpegEngine::new(), Some(&emitter))?;
    if result.status == JobStatus::Cancelled {
        return Err(AppError::Aborted);
    }

    let mut value = to_value(result, "slice result")?;
    if let Value::Object(map) = &mut value {
        map.insert("jobId".to_string(), json!(job_id));
    }
    Ok(value)
}

fn handle_async_media_slice(request: RpcRequest, writer: &SharedWriter, jobs: &JobSlot) {
    let params: MediaSliceParams = match params_from_value(request.params) {
        Ok(params) => params,
        Err(err) => {
            write_response(writer, request.id, Err(err));
            return;
        }
    };

    let job_id = match jobs.begin_job() {
        Ok(job_id) => job_id,
        Err(err) => {
            write_response(writer, request.id, Err(err));
            return;
        }
    };
    let _job_guard = ActiveJobGuard {
        slot: jobs.clone(),
        job_id,
    };
    log::info!(
        target: "vid_slicer::sidecar",
        "Job {} started: {}",
        job_id,
        params.input_path.display()
    );

    let result = run_slice(params, job_id, writer, jobs);
    match &result {
        Ok(value) => emit_job_complete(writer, job_id, value),
        Err(err) => {
            log::warn!(target: "vid_slicer::sidecar", "Job {} ended with error: {}", job_id, err);
            emit_job_error(writer, job_id, &parse_error_payload(err));
        }
    }
    write_response(writer, request.id, result);
}

/// Join workers that have already returned; keep the rest.
fn reap_finished(workers: &mut Vec<thread::JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        workers.drain(..).partition(|worker| worker.is_finished());
    *workers = running;
    for worker in finished {
        let _ = worker.join();
    }
}

fn main() -> io::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobSlot::new();
    let mut async_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if is_async_request(&request.method) {
            reap_finished(&mut async_workers);
            let writer = Arc::clone(&stdout);
            let job_slot = jobs.clone();
            let worker = thread::spawn(move || {
                handle_async_media_slice(request, &writer, &job_slot);
            });
            async_workers.push(worker);
        } else {
            handle_sync_request(request, &stdout, &jobs);
        }
    }

    // stdin closed: stop whatever is still running.
    jobs.cancel_current();
    for worker in async_workers {
        let _ = worker.join();
    }
    Ok(())
}
