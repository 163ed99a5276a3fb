//! Microphone capture feeding `input_audio_buffer.append` messages.
//!
//! Device streams are not `Send` on every platform, so the stream lives on a
//! dedicated capture thread for its whole life. Samples cross into a tokio
//! task over an unbounded channel, where they are framed, encoded, and sent.

use crate::{
    error::{AudioError, RealtimeError, Result},
    pcm::{Framer, downmix_to_mono, encode_frame},
    protocol::ClientEvent,
    socket::Outbound,
    teardown::ReleaseStack,
};
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::{sync::Arc, thread};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Source of mono float samples.
#[cfg_attr(test, mockall::automock)]
pub trait Microphone: Send + Sync {
    /// Opens the input device and starts delivering mono samples to
    /// `samples`. Runs on the capture thread; the returned handle is stopped
    /// on the same thread.
    fn open(
        &self,
        samples: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn ActiveCapture>, AudioError>;
}

pub trait ActiveCapture {
    fn sample_rate(&self) -> u32;
    fn stop(self: Box<Self>) -> Result<(), AudioError>;
}

/// Reported once per pipeline, when the device either opened or didn't.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started { sample_rate: u32 },
    Failed(AudioError),
}

/// The system default input device through cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl Microphone for CpalMicrophone {
    fn open(
        &self,
        samples: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn ActiveCapture>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;
        let supported = device.default_input_config()?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            ?sample_format,
            "Opening microphone"
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, samples)?,
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, samples)?,
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, samples)?,
            other => return Err(AudioError::UnsupportedFormat(other.to_string())),
        };
        stream.play()?;

        Ok(Box::new(CpalCapture {
            stream,
            sample_rate: config.sample_rate.0,
        }))
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let _ = samples.send(downmix_to_mono(&floats, channels));
            },
            |err| error!(error = %err, "Input stream error"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("input device not available".into())
            }
            other => other.into(),
        })?;
    Ok(stream)
}

struct CpalCapture {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl ActiveCapture for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(self: Box<Self>) -> Result<(), AudioError> {
        self.stream.pause()?;
        Ok(())
    }
}

/// A running capture thread plus its processing task.
#[derive(Debug)]
pub struct AudioPipeline {
    release: ReleaseStack,
}

impl AudioPipeline {
    /// Starts capturing. Whether the device opened is reported through
    /// `on_event`; encoded audio goes out on `control` while it is open and is
    /// dropped otherwise.
    pub fn start<F>(microphone: Arc<dyn Microphone>, control: Outbound, on_event: F) -> Self
    where
        F: Fn(CaptureEvent) + Send + Sync + 'static,
    {
        let mut release = ReleaseStack::new();
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("navtalk-capture".into())
            .spawn(move || match microphone.open(samples_tx) {
                Ok(capture) => {
                    let _ = ready_tx.send(Ok(capture.sample_rate()));
                    let _ = stop_rx.recv();
                    if let Err(e) = capture.stop() {
                        debug!(error = %e, "Failed to stop capture stream; ignoring");
                    }
                    debug!("Capture thread exiting");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            });

        match spawned {
            Ok(handle) => release.defer("capture device", move || async move {
                let _ = stop_tx.send(());
                tokio::task::spawn_blocking(move || handle.join())
                    .await
                    .map_err(|e| RealtimeError::Audio(AudioError::Device(e.to_string())))?
                    .map_err(|_| {
                        RealtimeError::Audio(AudioError::Device("capture thread panicked".into()))
                    })
            }),
            Err(e) => {
                warn!(error = %e, "Failed to spawn capture thread");
                on_event(CaptureEvent::Failed(AudioError::Device(e.to_string())));
                return Self { release };
            }
        }

        let task = tokio::spawn(process(ready_rx, samples_rx, control, on_event));
        release.defer("audio processing", move || async move {
            task.abort();
            Ok(())
        });

        Self { release }
    }

    /// Stops processing, then stops the device. Never fails.
    pub async fn stop(mut self) {
        self.release.release_all().await;
    }
}

async fn process<F>(
    ready: oneshot::Receiver<Result<u32, AudioError>>,
    mut samples: mpsc::UnboundedReceiver<Vec<f32>>,
    control: Outbound,
    on_event: F,
) where
    F: Fn(CaptureEvent) + Send + Sync + 'static,
{
    let sample_rate = match ready.await {
        Ok(Ok(rate)) => rate,
        Ok(Err(e)) => {
            warn!(error = %e, "Microphone unavailable");
            on_event(CaptureEvent::Failed(e));
            return;
        }
        Err(_) => {
            on_event(CaptureEvent::Failed(AudioError::Device(
                "capture thread exited before reporting".into(),
            )));
            return;
        }
    };
    let mut framer = match Framer::new(sample_rate) {
        Ok(framer) => framer,
        Err(e) => {
            on_event(CaptureEvent::Failed(e));
            return;
        }
    };
    info!(sample_rate, "Microphone capture started");
    on_event(CaptureEvent::Started { sample_rate });

    while let Some(chunk) = samples.recv().await {
        let frames = match framer.push(&chunk) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "Dropping audio chunk");
                continue;
            }
        };
        for frame in frames {
            if !control.is_open() {
                trace!("Control socket not open; dropping audio frame");
                continue;
            }
            for audio in encode_frame(&frame) {
                if let Err(e) = control.send_if_open(&ClientEvent::InputAudioBufferAppend { audio }) {
                    warn!(error = %e, "Failed to queue audio");
                    return;
                }
            }
        }
    }
    debug!("Microphone sample stream ended");
}
