use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ndarray::{Array3, Array4};
use ort::{session::Session, value::Value};

use crate::model::{self, Device};

/// Backbone seam: a normalized (1, 3, H, W) image tensor in, one or more (C, H, W)
/// feature maps out.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, input: &Array4<f32>) -> Result<Vec<Array3<f32>>>;
}

/// ONNX Runtime backed extractor.
///
/// A single session is shared by every caller and guarded by a mutex, so concurrent
/// scans serialize inference while decoding and scoring still overlap.
pub struct OnnxExtractor {
    session: Mutex<Session>,
}

impl OnnxExtractor {
    pub fn new(model: &Path, device: Device) -> Result<Self> {
        log::info!("Loading reid model {} on {}", model.display(), device);
        Ok(Self {
            session: Mutex::new(model::reid_session(model, device)?),
        })
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn extract(&self, input: &Array4<f32>) -> Result<Vec<Array3<f32>>> {
        let input_tensor = Value::from_array(input.clone())?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        let mut maps = Vec::new();
        for (name, output) in outputs.iter() {
            let Ok((shape, data)) = output.try_extract_tensor::<f32>() else {
                log::debug!("skipping non-f32 output {name}");
                continue;
            };
            // only batch-of-one 4-d outputs are feature maps
            if shape.len() != 4 || shape[0] != 1 {
                log::debug!("skipping output {name} with shape {:?}", &shape[..]);
                continue;
            }
            let dims = (shape[1] as usize, shape[2] as usize, shape[3] as usize);
            let map = Array3::from_shape_vec(dims, data.to_vec())
                .with_context(|| format!("reshaping output {name}"))?;
            maps.push(map);
        }
        Ok(maps)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference exceeded {0:?}")]
    TimedOut(Duration),
    #[error("model is still busy with an image that timed out")]
    Stalled,
    #[error("inference thread exited")]
    Disconnected,
}

enum Reply {
    Started,
    Done(Result<Vec<Array3<f32>>>),
}

struct Job {
    input: Array4<f32>,
    reply: Sender<Reply>,
}

const QUEUE_POLL: Duration = Duration::from_millis(20);

/// Runs another extractor on one dedicated inference thread and bounds each call.
///
/// Calls are served in arrival order. The limit covers only the inner `extract`
/// call: time spent queued behind other callers does not count. Once a call times
/// out the thread is considered stalled, and callers fail with
/// [`InferenceError::Stalled`] until the slow call returns. No more than one
/// inference thread ever exists.
pub struct TimedExtractor {
    jobs: Sender<Job>,
    limit: Duration,
    stalled: Arc<AtomicBool>,
}

impl TimedExtractor {
    pub fn new(inner: Box<dyn FeatureExtractor>, limit: Duration) -> Result<Self> {
        let (jobs, queue) = crossbeam_channel::unbounded::<Job>();
        let stalled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stalled);

        std::thread::Builder::new()
            .name("alignreid-inference".into())
            .spawn(move || {
                for job in queue {
                    // caller gave up while queued
                    if job.reply.send(Reply::Started).is_err() {
                        continue;
                    }
                    let out = inner.extract(&job.input);
                    let _ = job.reply.send(Reply::Done(out));
                    flag.store(false, Ordering::Release);
                }
            })
            .context("spawn inference thread")?;

        Ok(Self {
            jobs,
            limit,
            stalled,
        })
    }

    fn await_start(&self, reply: &Receiver<Reply>) -> Result<(), InferenceError> {
        loop {
            match reply.recv_timeout(QUEUE_POLL) {
                Ok(Reply::Started) => return Ok(()),
                // the thread always announces a job before finishing it
                Ok(Reply::Done(_)) => return Err(InferenceError::Disconnected),
                Err(RecvTimeoutError::Timeout) => {
                    if self.stalled.load(Ordering::Acquire) {
                        return Err(InferenceError::Stalled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(InferenceError::Disconnected),
            }
        }
    }
}

impl FeatureExtractor for TimedExtractor {
    fn extract(&self, input: &Array4<f32>) -> Result<Vec<Array3<f32>>> {
        if self.stalled.load(Ordering::Acquire) {
            return Err(InferenceError::Stalled.into());
        }

        let (tx, reply) = crossbeam_channel::bounded(2);
        self.jobs
            .send(Job {
                input: input.clone(),
                reply: tx,
            })
            .map_err(|_| InferenceError::Disconnected)?;

        self.await_start(&reply)?;
        match reply.recv_timeout(self.limit) {
            Ok(Reply::Done(out)) => out,
            Ok(Reply::Started) => Err(InferenceError::Disconnected.into()),
            Err(RecvTimeoutError::Timeout) => {
                self.stalled.store(true, Ordering::Release);
                // finished between the deadline and the store: the thread has already
                // cleared the flag, so undo ours
                if let Ok(Reply::Done(out)) = reply.try_recv() {
                    self.stalled.store(false, Ordering::Release);
                    return out;
                }
                Err(InferenceError::TimedOut(self.limit).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(InferenceError::Disconnected.into()),
        }
    }
}
