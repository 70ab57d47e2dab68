//! Spatial video compositor.
//!
//! Constituent tracks are decoded and painted onto a shared 4:2:0
//! canvas at their laid-out rectangles, in selection order, with
//! per-track opacity over a solid background color. The composited
//! canvas is re-emitted at most once per frame interval (25 fps).

use bytes::Bytes;
use tracing::debug;

use crate::codec::{CodecRegistry, VideoDecoder, VideoEncoder, VideoFrame};
use crate::error::Result;
use crate::metadata::Track;

use super::{earliest, max_live_offset, Constituent, MediaStream, StreamPacket};

/// 25 frames per second.
pub const FRAME_INTERVAL_NS: i64 = 40_000_000;

/// Placement of one constituent on the canvas. Opacity is 0.0..=1.0.
#[derive(Debug, Clone, Copy)]
pub struct VideoLayout {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub opacity: f64,
}

struct VideoConstituent {
    decoder: Box<dyn VideoDecoder>,
    layout: VideoLayout,
}

pub struct VideoMixer {
    constituents: Vec<Constituent>,
    codecs: Vec<VideoConstituent>,
    encoder: Box<dyn VideoEncoder>,
    canvas: VideoFrame,
    background: (u8, u8, u8),
    last_emit_ns: Option<i64>,
    last_paint_ns: i64,
    dirty: bool,
}

fn round_up_16(n: u32) -> u32 {
    (n + 15) & !15
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

fn blend(dst: u8, src: u8, alpha: i32) -> u8 {
    (dst as i32 + (src as i32 - dst as i32) * alpha / 256).clamp(0, 255) as u8
}

impl VideoMixer {
    /// `tracks` pairs each track with its timeline offset (shift
    /// included), its index within the selection, and its layout.
    /// An explicit `canvas_size` is rounded up to a multiple of 16;
    /// without one the canvas is the union bounding box of the layouts.
    pub fn open(
        tracks: &[(&Track, i64, usize, VideoLayout)],
        registry: &CodecRegistry,
        canvas_size: Option<(u32, u32)>,
        background: (u8, u8, u8),
    ) -> Result<VideoMixer> {
        let mut constituents = Vec::with_capacity(tracks.len());
        let mut codecs = Vec::with_capacity(tracks.len());
        for &(track, offset_ms, index, layout) in tracks {
            let payload_type = track.payload_type.unwrap_or(crate::codec::RAW_VIDEO_PT);
            constituents.push(Constituent::open(track, offset_ms, index)?);
            codecs.push(VideoConstituent {
                decoder: registry.video_decoder(payload_type)?,
                layout,
            });
        }

        let (width, height) = match canvas_size {
            Some((w, h)) => (w, h),
            None => {
                let w = tracks.iter().map(|t| t.3.x + t.3.width).max().unwrap_or(0);
                let h = tracks.iter().map(|t| t.3.y + t.3.height).max().unwrap_or(0);
                (w, h)
            }
        };
        let (width, height) = (round_up_16(width.max(16)), round_up_16(height.max(16)));
        debug!("[mixer] video canvas {width}x{height}");

        let mut mixer = VideoMixer {
            constituents,
            codecs,
            encoder: registry.video_encoder(),
            canvas: VideoFrame::black(width, height),
            background,
            last_emit_ns: None,
            last_paint_ns: 0,
            dirty: false,
        };
        mixer.clear_canvas();
        Ok(mixer)
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas.width, self.canvas.height)
    }

    fn clear_canvas(&mut self) {
        let (r, g, b) = self.background;
        let (y, u, v) = rgb_to_yuv(r, g, b);
        self.canvas.y.fill(y);
        self.canvas.u.fill(u);
        self.canvas.v.fill(v);
    }

    /// Paints a frame over the whole canvas before any packet is read,
    /// used to prime the output with a still image.
    pub fn fill_frame(&mut self, frame: &VideoFrame) {
        let layout = VideoLayout {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
            opacity: 1.0,
        };
        paint(&mut self.canvas, frame, &layout);
        self.dirty = true;
    }

    fn encode_canvas(&mut self, timestamp_ns: i64, track: usize) -> Result<StreamPacket> {
        let payload: Bytes = self.encoder.encode(&self.canvas)?;
        self.last_emit_ns = Some(timestamp_ns);
        self.dirty = false;
        Ok(StreamPacket {
            timestamp_ns,
            payload,
            marker: true,
            track,
        })
    }
}

impl MediaStream for VideoMixer {
    fn seek(&mut self, window_start_ms: i64) -> Result<()> {
        for c in &mut self.constituents {
            c.seek(window_start_ms)?;
        }
        self.last_emit_ns = None;
        self.last_paint_ns = 0;
        self.dirty = false;
        self.clear_canvas();
        Ok(())
    }

    fn offset_ms(&self) -> i64 {
        max_live_offset(&self.constituents)
    }

    fn read_next(&mut self) -> Result<Option<StreamPacket>> {
        // A primed canvas goes out at the window start, ahead of the
        // first captured frame.
        if self.dirty && self.last_emit_ns.is_none() {
            return self.encode_canvas(0, 0).map(Some);
        }
        loop {
            let Some(i) = earliest(&mut self.constituents)? else {
                // Sources are dry; flush anything painted but unsent.
                if self.dirty {
                    let ts = self.last_paint_ns;
                    return self.encode_canvas(ts, 0).map(Some);
                }
                return Ok(None);
            };
            let correction = self.constituents[i].correction_ns;
            let track = self.constituents[i].track;
            let Some(packet) = self.constituents[i].take() else {
                continue;
            };
            let ts = packet.timestamp_ns + correction;
            let Some(frame) = self.codecs[i].decoder.decode(&packet)? else {
                continue;
            };
            paint(&mut self.canvas, &frame, &self.codecs[i].layout);
            self.dirty = true;
            self.last_paint_ns = ts;

            // Coalesce anything faster than the canvas frame rate.
            let due = match self.last_emit_ns {
                None => true,
                Some(last) => ts - last >= FRAME_INTERVAL_NS,
            };
            if due {
                return self.encode_canvas(ts, track).map(Some);
            }
        }
    }
}

/// Converts packed RGB pixels to a 4:2:0 frame, averaging each 2x2
/// block for chroma. Used for still-image priming.
pub fn frame_from_rgb(width: u32, height: u32, rgb: &[u8]) -> VideoFrame {
    let mut frame = VideoFrame::black(round_up_16(width.max(16)), round_up_16(height.max(16)));
    let fw = frame.width as usize;
    let (w, h) = (width as usize, height as usize);
    let mut u_plane = vec![0u32; frame.u.len()];
    let mut v_plane = vec![0u32; frame.v.len()];
    let mut counts = vec![0u32; frame.u.len()];
    for j in 0..h.min(frame.height as usize) {
        for i in 0..w.min(fw) {
            let p = (j * w + i) * 3;
            let (y, u, v) = rgb_to_yuv(rgb[p], rgb[p + 1], rgb[p + 2]);
            frame.y[j * fw + i] = y;
            let c = (j / 2) * (fw / 2) + i / 2;
            u_plane[c] += u as u32;
            v_plane[c] += v as u32;
            counts[c] += 1;
        }
    }
    for c in 0..counts.len() {
        if counts[c] > 0 {
            frame.u[c] = (u_plane[c] / counts[c]) as u8;
            frame.v[c] = (v_plane[c] / counts[c]) as u8;
        }
    }
    frame
}

/// Alpha-blends `frame` onto `canvas` at the layout rectangle, clipped
/// to the canvas. The frame is painted at its decoded size.
fn paint(canvas: &mut VideoFrame, frame: &VideoFrame, layout: &VideoLayout) {
    let alpha = (layout.opacity.clamp(0.0, 1.0) * 256.0) as i32;
    let width = frame.width.min(layout.width);
    let height = frame.height.min(layout.height);

    for j in 0..height {
        let cy = layout.y + j;
        if cy >= canvas.height {
            break;
        }
        for i in 0..width {
            let cx = layout.x + i;
            if cx >= canvas.width {
                break;
            }
            let src = frame.y[(j * frame.width + i) as usize];
            let dst = &mut canvas.y[(cy * canvas.width + cx) as usize];
            *dst = blend(*dst, src, alpha);
        }
    }

    let (cw, ch) = (canvas.width / 2, canvas.height / 2);
    let (fw, fh) = (frame.width / 2, frame.height / 2);
    for j in 0..(height / 2).min(fh) {
        let cy = layout.y / 2 + j;
        if cy >= ch {
            break;
        }
        for i in 0..(width / 2).min(fw) {
            let cx = layout.x / 2 + i;
            if cx >= cw {
                break;
            }
            let idx = (cy * cw + cx) as usize;
            let sidx = (j * fw + i) as usize;
            canvas.u[idx] = blend(canvas.u[idx], frame.u[sidx], alpha);
            canvas.v[idx] = blend(canvas.v[idx], frame.v[sidx], alpha);
        }
    }
}
