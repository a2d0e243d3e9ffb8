//! ffmpeg-backed motion rendering and final assembly.
//!
//! The renderer runs synchronously on the render pool and builds a single
//! `zoompan` filter graph per segment. The assembler concatenates clips with
//! the concat demuxer and muxes the narration on top.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use super::{MediaAssembler, MotionJob, MotionRenderer};
use crate::domain::Motion;
use crate::error::PipelineError;

const MAX_ZOOM: f64 = 1.5;

/// Renders stills into clips with pan/zoom motion
#[derive(Debug, Clone)]
pub struct FfmpegMotionRenderer {
    binary: String,
}

impl Default for FfmpegMotionRenderer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegMotionRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// ffmpeg arguments for one job
    pub fn build_args(&self, job: &MotionJob) -> Vec<String> {
        let (width, height) = job.frame_size;
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];

        for image in &job.images {
            args.push("-i".to_string());
            args.push(image.display().to_string());
        }

        let mut graph = String::new();
        for (index, (duration, motion)) in job.durations.iter().zip(&job.motions).enumerate() {
            let frames = ((duration * job.fps as f64).round() as u64).max(1);
            let _ = write!(
                graph,
                "[{index}:v]scale={sw}:{sh},{zoompan}:d={frames}:s={width}x{height}:fps={fps},setsar=1[v{index}];",
                sw = width * 2,
                sh = height * 2,
                zoompan = zoompan_expr(*motion, frames),
                fps = job.fps,
            );
        }
        for index in 0..job.images.len() {
            let _ = write!(graph, "[v{index}]");
        }
        let _ = write!(graph, "concat=n={}:v=1:a=0[out]", job.images.len());

        args.extend([
            "-filter_complex".to_string(),
            graph,
            "-map".to_string(),
            "[out]".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            job.fps.to_string(),
            job.output.display().to_string(),
        ]);
        args
    }
}

/// `zoompan` filter expression for one motion effect
fn zoompan_expr(motion: Motion, frames: u64) -> String {
    let centre = "x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)'";
    let step = (MAX_ZOOM - 1.0) / frames as f64;
    match motion {
        Motion::ZoomIn => format!("zoompan=z='min(zoom+{step:.6},{MAX_ZOOM})':{centre}"),
        Motion::ZoomOut => format!(
            "zoompan=z='if(eq(on,0),{MAX_ZOOM},max(zoom-{step:.6},1))':{centre}"
        ),
        Motion::PanRight => format!(
            "zoompan=z=1.2:x='(iw-iw/zoom)*on/{frames}':y='ih/2-(ih/zoom/2)'"
        ),
        Motion::PanLeft => format!(
            "zoompan=z=1.2:x='(iw-iw/zoom)*(1-on/{frames})':y='ih/2-(ih/zoom/2)'"
        ),
        Motion::KenBurns => format!(
            "zoompan=z='min(zoom+{step:.6},{MAX_ZOOM})':x='(iw-iw/zoom)*on/{frames}':y='(ih-ih/zoom)*on/{frames}'"
        ),
    }
}

impl MotionRenderer for FfmpegMotionRenderer {
    fn render(&self, job: &MotionJob) -> Result<(), PipelineError> {
        if job.images.is_empty()
            || job.images.len() != job.durations.len()
            || job.images.len() != job.motions.len()
        {
            return Err(PipelineError::InvalidInput {
                field: "motion_job".to_string(),
                reason: format!(
                    "{} images, {} durations, {} motions",
                    job.images.len(),
                    job.durations.len(),
                    job.motions.len()
                ),
            });
        }

        let output = std::process::Command::new(&self.binary)
            .args(self.build_args(job))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PipelineError::provider(&self.binary, format!("failed to spawn: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::provider(
                &self.binary,
                format!("render of {} failed: {}", job.output.display(), stderr.trim()),
            ));
        }

        Ok(())
    }
}

/// Concatenates clips and muxes narration audio
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegAssembler {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Run ffmpeg over a concat-demuxer list of `inputs`; `args` follow the list input.
    async fn concat_with(
        &self,
        inputs: &[PathBuf],
        args: Vec<OsString>,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if inputs.is_empty() {
            return Err(PipelineError::Composition {
                diagnostics: "no clips to concatenate".to_string(),
            });
        }

        let mut list = tempfile::Builder::new()
            .prefix("reelsmith-concat-")
            .suffix(".txt")
            .tempfile()?;
        list.write_all(concat_list(inputs).as_bytes())?;
        list.flush()?;

        let result = tokio::process::Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(args)
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Composition {
                diagnostics: format!("failed to spawn {}: {}", self.ffmpeg, e),
            })?;

        if !result.status.success() {
            return Err(PipelineError::Composition {
                diagnostics: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(output.to_path_buf())
    }
}

/// Concat demuxer list body
fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", clip.display().to_string().replace('\'', "'\\''")))
        .collect()
}

#[async_trait]
impl MediaAssembler for FfmpegAssembler {
    async fn compose(
        &self,
        clips: &[PathBuf],
        audio: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        debug!(clips = clips.len(), output = %output.display(), "Composing video");

        let mut args = vec![OsString::from("-i"), audio.as_os_str().to_owned()];
        args.extend(
            ["-map", "0:v", "-map", "1:a", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac"]
                .map(OsString::from),
        );
        self.concat_with(clips, args, output).await
    }

    async fn concatenate(&self, videos: &[PathBuf], output: &Path) -> Result<PathBuf, PipelineError> {
        debug!(videos = videos.len(), output = %output.display(), "Concatenating section videos");

        let args = [
            "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a", "192k", "-movflags",
            "+faststart",
        ]
        .map(OsString::from)
        .to_vec();
        self.concat_with(videos, args, output).await
    }

    async fn media_duration(&self, path: &Path) -> Result<f64, PipelineError> {
        let result = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| PipelineError::provider(&self.ffprobe, format!("failed to spawn: {}", e)))?;

        if !result.status.success() {
            return Err(PipelineError::provider(
                &self.ffprobe,
                String::from_utf8_lossy(&result.stderr).trim(),
            ));
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        stdout.trim().parse::<f64>().map_err(|e| {
            PipelineError::provider(&self.ffprobe, format!("unparseable duration '{}': {}", stdout.trim(), e))
        })
    }
}
