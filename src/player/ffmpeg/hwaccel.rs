//! Hardware-acceleration device setup and detection.
//!
//! The video codec is first opened with a platform-preferred hardware
//! device context attached; when that fails at any stage the caller
//! retries in pure software. Decoded hardware frames are transferred to
//! system memory before color conversion.

use std::ptr;

use anyhow::{anyhow, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video as VideoFrame;

/// Active hardware-acceleration state for an open codec.
pub(crate) struct HwAccel {
    kind: ffi::AVHWDeviceType,
    /// Pixel format frames land in after transfer to system memory.
    pub sw_format: Pixel,
}

impl HwAccel {
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI => "vaapi",
            ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => "videotoolbox",
            ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA => "d3d11va",
            _ => "hardware",
        }
    }
}

/// Platform-preferred hardware device type.
fn preferred_device_type() -> Option<ffi::AVHWDeviceType> {
    #[cfg(target_os = "linux")]
    {
        Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI)
    }
    #[cfg(target_os = "macos")]
    {
        Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX)
    }
    #[cfg(target_os = "windows")]
    {
        Some(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Detect hardware acceleration methods plausibly available on this host.
pub fn detect_hw_accel() -> Vec<String> {
    let mut available = Vec::new();

    #[cfg(target_os = "linux")]
    {
        // VAAPI (Intel/AMD)
        if std::path::Path::new("/dev/dri/renderD128").exists() {
            available.push("vaapi".to_string());
        }
        // NVDEC (NVIDIA)
        if std::path::Path::new("/dev/nvidia0").exists() {
            available.push("nvdec".to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        // VideoToolbox is always available on macOS
        available.push("videotoolbox".to_string());
    }

    #[cfg(target_os = "windows")]
    {
        available.push("dxva2".to_string());
        available.push("d3d11va".to_string());
    }

    available
}

/// Open a video decoder with a hardware device context attached.
///
/// Fails when no device type applies to this platform, the device cannot
/// be created, or the codec refuses to open with it.
pub(crate) fn open_decoder(
    parameters: ffmpeg::codec::Parameters,
) -> Result<(ffmpeg::decoder::Video, HwAccel)> {
    let kind =
        preferred_device_type().ok_or_else(|| anyhow!("no hardware device type for this OS"))?;
    let mut context = ffmpeg::codec::context::Context::from_parameters(parameters)?;

    unsafe {
        let mut device: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = ffi::av_hwdevice_ctx_create(&mut device, kind, ptr::null(), ptr::null_mut(), 0);
        if ret < 0 {
            return Err(anyhow!("av_hwdevice_ctx_create failed ({})", ret));
        }
        (*context.as_mut_ptr()).hw_device_ctx = ffi::av_buffer_ref(device);
        ffi::av_buffer_unref(&mut device);
        if (*context.as_mut_ptr()).hw_device_ctx.is_null() {
            return Err(anyhow!("failed to reference hardware device context"));
        }
    }

    apply_error_concealment(&mut context);
    let decoder = context
        .decoder()
        .video()
        .map_err(|e| anyhow!("hardware codec open failed: {}", e))?;
    Ok((
        decoder,
        HwAccel {
            kind,
            sw_format: Pixel::NV12,
        },
    ))
}

/// Enable tolerant-but-checked decoding of damaged streams.
pub(crate) fn apply_error_concealment(context: &mut ffmpeg::codec::context::Context) {
    unsafe {
        let ctx = context.as_mut_ptr();
        (*ctx).flags |= ffi::AV_CODEC_FLAG_OUTPUT_CORRUPT as i32;
        (*ctx).err_recognition =
            (ffi::AV_EF_EXPLODE | ffi::AV_EF_COMPLIANT | ffi::AV_EF_CRCCHECK) as i32;
    }
}

/// Whether a decoded frame still lives in device memory.
pub(crate) fn is_hw_frame(frame: &VideoFrame) -> bool {
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

/// Transfer a hardware frame into system memory.
pub(crate) fn transfer_to_software(frame: &VideoFrame) -> Result<VideoFrame> {
    let mut sw = VideoFrame::empty();
    let ret = unsafe { ffi::av_hwframe_transfer_data(sw.as_mut_ptr(), frame.as_ptr(), 0) };
    if ret < 0 {
        return Err(anyhow!("av_hwframe_transfer_data failed ({})", ret));
    }
    Ok(sw)
}
