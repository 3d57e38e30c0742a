//! DXGI Desktop Duplication capture for Windows.
//!
//! Uses the Direct3D 11 Desktop Duplication API to obtain GPU-backed
//! desktop frames with minimal latency. Window targets are clipped on
//! the CPU after the staging copy using the window's DWM extended
//! frame bounds, which are re-read every frame because windows move.
//!
//! # Platform
//!
//! This module is **Windows-only**. On other platforms the type is
//! still defined but initialization fails at runtime.

use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, CapturedFrame, MonitorInfo, Rect, WindowHandle, WindowInfo};
use crate::error::StreamError;
use crate::pipeline::pool::RawFrame;
#[cfg(target_os = "windows")]
use crate::pipeline::pool::PixelFormat;
use crate::pipeline::stats::CaptureStats;

/// How long to let the compositor settle before re-creating a lost
/// duplication session.
#[cfg(target_os = "windows")]
const REINIT_SETTLE: Duration = Duration::from_millis(100);

/// DXGI-based capture source.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device (hardware, WARP fallback) with BGRA support
///    and multithread protection.
/// 2. Enumerate outputs and duplicate the target monitor.
/// 3. Create a CPU-readable staging texture at the duplication size.
/// 4. Per frame: `AcquireNextFrame`, `CopyResource` into staging, `Map`,
///    copy (optionally clipped) rows into the caller's buffer, `Unmap`,
///    `ReleaseFrame`.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub struct DxgiCapture {
    /// Capture width in pixels (the monitor's, for window targets).
    width: u32,
    /// Capture height in pixels.
    height: u32,
    /// Monitor currently duplicated.
    monitor_index: u32,
    /// Monitor desktop rectangle, for window clipping.
    monitor_rect: Rect,
    /// Window target, when clipping is active.
    target_window: Option<WindowHandle>,
    /// Last known window extended-frame bounds.
    window_rect: Rect,
    initialized: bool,
    frame_acquired: bool,
    frame_id: u64,
    started: Instant,
    stats: CaptureStats,
    capture_time_accum: f64,
    time_sample_count: u32,

    // ── Platform handles (Windows only) ──────────────────────
    #[cfg(target_os = "windows")]
    device: Option<windows::Win32::Graphics::Direct3D11::ID3D11Device>,
    #[cfg(target_os = "windows")]
    context: Option<windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext>,
    #[cfg(target_os = "windows")]
    duplication: Option<windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication>,
    #[cfg(target_os = "windows")]
    staging_texture: Option<windows::Win32::Graphics::Direct3D11::ID3D11Texture2D>,
}

impl DxgiCapture {
    /// Create an uninitialized capture source. Call
    /// [`init_monitor`](CaptureSource::init_monitor) or
    /// [`init_window`](CaptureSource::init_window) before capturing.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            monitor_index: 0,
            monitor_rect: Rect::default(),
            target_window: None,
            window_rect: Rect::default(),
            initialized: false,
            frame_acquired: false,
            frame_id: 0,
            started: Instant::now(),
            stats: CaptureStats::default(),
            capture_time_accum: 0.0,
            time_sample_count: 0,
            #[cfg(target_os = "windows")]
            device: None,
            #[cfg(target_os = "windows")]
            context: None,
            #[cfg(target_os = "windows")]
            duplication: None,
            #[cfg(target_os = "windows")]
            staging_texture: None,
        }
    }

    /// Capture counters.
    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    fn monotonic_ns(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }
}

impl Default for DxgiCapture {
    fn default() -> Self {
        Self::new()
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows::{
        core::Interface,
        Win32::Foundation::{HMODULE, HWND, LPARAM, RECT},
        Win32::Graphics::{
            Direct3D::{
                D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL,
                D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0,
                D3D_FEATURE_LEVEL_11_1,
            },
            Direct3D10::ID3D10Multithread,
            Direct3D11::*,
            Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED, DWMWA_EXTENDED_FRAME_BOUNDS},
            Dxgi::{Common::*, *},
            Gdi::{GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITOR_DEFAULTTONEAREST},
        },
        Win32::UI::WindowsAndMessaging::{
            EnumWindows, GetClassNameW, GetWindowLongW, GetWindowRect, GetWindowTextW,
            GetWindowThreadProcessId, IsWindow, IsWindowVisible, GWL_EXSTYLE, WS_EX_APPWINDOW,
            WS_EX_TOOLWINDOW,
        },
    };

    fn to_hwnd(handle: WindowHandle) -> HWND {
        HWND(handle.0 as usize as *mut core::ffi::c_void)
    }

    fn from_win_rect(r: RECT) -> Rect {
        Rect {
            left: r.left,
            top: r.top,
            right: r.right,
            bottom: r.bottom,
        }
    }

    impl DxgiCapture {
        pub(super) fn platform_init_monitor(
            &mut self,
            monitor_index: u32,
        ) -> Result<(), StreamError> {
            self.shutdown();
            self.monitor_index = monitor_index;
            self.target_window = None;

            unsafe {
                self.create_device()?;
                self.create_duplication(monitor_index)?;
                self.create_staging_texture()?;
            }

            self.initialized = true;
            self.frame_id = 0;
            tracing::info!(
                "DXGI capture initialized: {}x{} @ monitor {}",
                self.width,
                self.height,
                monitor_index
            );
            Ok(())
        }

        pub(super) fn platform_init_window(
            &mut self,
            window: WindowHandle,
        ) -> Result<(), StreamError> {
            let hwnd = to_hwnd(window);
            if !unsafe { IsWindow(hwnd) }.as_bool() {
                return Err(StreamError::InvalidWindow(window.0));
            }

            // Find the monitor this window lives on.
            let monitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) };
            let monitors = Self::enumerate_monitors();
            let monitor_index = monitors
                .iter()
                .position(|m| {
                    // Match by desktop rectangle; HMONITOR is not kept in MonitorInfo.
                    let mut mi = MONITORINFO {
                        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                        ..Default::default()
                    };
                    unsafe { GetMonitorInfoW(monitor, &mut mi) }.as_bool()
                        && mi.rcMonitor.left == m.left
                        && mi.rcMonitor.top == m.top
                })
                .unwrap_or(0) as u32;

            self.platform_init_monitor(monitor_index)?;
            self.target_window = Some(window);

            let mut rect = RECT::default();
            unsafe {
                DwmGetWindowAttribute(
                    hwnd,
                    DWMWA_EXTENDED_FRAME_BOUNDS,
                    &mut rect as *mut _ as *mut _,
                    std::mem::size_of::<RECT>() as u32,
                )
                .map_err(|e| StreamError::CaptureDevice(format!("DwmGetWindowAttribute: {e}")))?;
            }
            self.window_rect = from_win_rect(rect);

            tracing::info!(
                "window capture initialized: handle={:#x}, rect=({},{},{},{})",
                window.0,
                rect.left,
                rect.top,
                rect.right,
                rect.bottom
            );
            Ok(())
        }

        pub(super) fn shutdown(&mut self) {
            if let Some(dup) = &self.duplication {
                let _ = unsafe { dup.ReleaseFrame() };
            }
            self.staging_texture = None;
            self.duplication = None;
            self.context = None;
            self.device = None;
            self.initialized = false;
            self.frame_acquired = false;
            self.width = 0;
            self.height = 0;
        }

        unsafe fn create_device(&mut self) -> Result<(), StreamError> {
            let feature_levels: [D3D_FEATURE_LEVEL; 4] = [
                D3D_FEATURE_LEVEL_11_1,
                D3D_FEATURE_LEVEL_11_0,
                D3D_FEATURE_LEVEL_10_1,
                D3D_FEATURE_LEVEL_10_0,
            ];

            let mut device = None;
            let mut context = None;

            let hardware = unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    HMODULE::default(),
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    Some(&feature_levels),
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
            };
            if hardware.is_err() {
                tracing::warn!("hardware D3D11 device creation failed, trying WARP");
                unsafe {
                    D3D11CreateDevice(
                        None,
                        D3D_DRIVER_TYPE_WARP,
                        HMODULE::default(),
                        D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                        Some(&feature_levels),
                        D3D11_SDK_VERSION,
                        Some(&mut device),
                        None,
                        Some(&mut context),
                    )
                }
                .map_err(|e| StreamError::CaptureDevice(format!("D3D11CreateDevice: {e}")))?;
            }

            let device =
                device.ok_or_else(|| StreamError::CaptureDevice("D3D11 device is None".into()))?;
            let context =
                context.ok_or_else(|| StreamError::CaptureDevice("D3D11 context is None".into()))?;

            // Capture runs on one thread but staging copies may come from
            // another in future variants.
            if let Ok(multithread) = device.cast::<ID3D10Multithread>() {
                unsafe {
                    multithread.SetMultithreadProtected(true);
                }
            }

            self.device = Some(device);
            self.context = Some(context);
            Ok(())
        }

        unsafe fn create_duplication(&mut self, monitor_index: u32) -> Result<(), StreamError> {
            let device = self.device.as_ref().expect("device created first");

            let dxgi_device: IDXGIDevice = device
                .cast()
                .map_err(|e| StreamError::CaptureDevice(format!("cast to IDXGIDevice: {e}")))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }
                .map_err(|e| StreamError::CaptureDevice(format!("GetAdapter: {e}")))?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(monitor_index) }
                .map_err(|_| StreamError::MonitorNotFound(monitor_index))?;

            let desc = unsafe { output.GetDesc() }
                .map_err(|e| StreamError::CaptureDevice(format!("GetDesc: {e}")))?;
            self.monitor_rect = from_win_rect(desc.DesktopCoordinates);
            self.width = (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left) as u32;
            self.height = (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top) as u32;

            let output1: IDXGIOutput1 = output
                .cast()
                .map_err(|e| StreamError::CaptureDevice(format!("cast to IDXGIOutput1: {e}")))?;
            let duplication = unsafe { output1.DuplicateOutput(device) }.map_err(|e| {
                if e.code() == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE {
                    StreamError::CaptureDevice(
                        "desktop duplication not available - another app may be using it".into(),
                    )
                } else {
                    StreamError::CaptureDevice(format!("DuplicateOutput: {e}"))
                }
            })?;

            self.duplication = Some(duplication);
            Ok(())
        }

        unsafe fn create_staging_texture(&mut self) -> Result<(), StreamError> {
            let device = self.device.as_ref().expect("device created first");

            let desc = D3D11_TEXTURE2D_DESC {
                Width: self.width,
                Height: self.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging = None;
            unsafe { device.CreateTexture2D(&desc, None, Some(&mut staging)) }
                .map_err(|e| StreamError::CaptureDevice(format!("CreateTexture2D: {e}")))?;
            self.staging_texture =
                Some(staging.ok_or_else(|| {
                    StreamError::CaptureDevice("staging texture is None".into())
                })?);
            Ok(())
        }

        /// Tear down and re-create the duplication after access loss.
        /// The staging texture is re-created too; a mode change may have
        /// altered the output dimensions.
        fn reinit_duplication(&mut self) -> Result<(), StreamError> {
            if let Some(dup) = self.duplication.take() {
                let _ = unsafe { dup.ReleaseFrame() };
            }
            self.frame_acquired = false;

            // Let the compositor release its resources.
            std::thread::sleep(REINIT_SETTLE);

            unsafe {
                self.create_duplication(self.monitor_index)?;
                self.create_staging_texture()
            }
        }

        pub(super) fn platform_next_frame(
            &mut self,
            frame: &mut CapturedFrame,
            timeout: Duration,
        ) -> Result<bool, StreamError> {
            if !self.initialized {
                return Err(StreamError::NotInitialized);
            }
            if self.frame_acquired {
                return Err(StreamError::FrameNotReleased);
            }
            let Some(duplication) = self.duplication.clone() else {
                return Err(StreamError::NotInitialized);
            };

            let timer = crate::pipeline::stats::Timer::new();

            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;
            let acquired = unsafe {
                duplication.AcquireNextFrame(
                    timeout.as_millis() as u32,
                    &mut frame_info,
                    &mut resource,
                )
            };

            match acquired {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => {
                    // No new frame available - not an error.
                    return Ok(false);
                }
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                    tracing::warn!("desktop duplication access lost, reinitializing");
                    self.reinit_duplication()?;
                    return Ok(false); // try again next tick
                }
                Err(_) => {
                    self.stats.frames_dropped += 1;
                    return Ok(false);
                }
            }

            let resource = match resource {
                Some(r) => r,
                None => {
                    let _ = unsafe { duplication.ReleaseFrame() };
                    self.stats.frames_dropped += 1;
                    return Ok(false);
                }
            };

            let texture: ID3D11Texture2D = match resource.cast() {
                Ok(t) => t,
                Err(e) => {
                    let _ = unsafe { duplication.ReleaseFrame() };
                    return Err(StreamError::CaptureDevice(format!(
                        "cast to ID3D11Texture2D: {e}"
                    )));
                }
            };

            self.frame_id += 1;
            self.frame_acquired = true;

            frame.texture = Some(texture);
            frame.width = self.width;
            frame.height = self.height;
            frame.timestamp_ns = self.monotonic_ns();
            frame.frame_id = self.frame_id;
            frame.cursor = if frame_info.PointerPosition.Visible.as_bool() {
                Some((
                    frame_info.PointerPosition.Position.x,
                    frame_info.PointerPosition.Position.y,
                ))
            } else {
                None
            };

            self.stats.frames_captured += 1;
            self.capture_time_accum += timer.elapsed_ms();
            self.time_sample_count += 1;
            if self.time_sample_count >= 60 {
                self.stats.avg_capture_time_ms =
                    self.capture_time_accum / self.time_sample_count as f64;
                self.capture_time_accum = 0.0;
                self.time_sample_count = 0;
            }

            Ok(true)
        }

        /// Re-read the tracked window's extended frame bounds.
        fn update_window_rect(&mut self) -> Result<(), StreamError> {
            let Some(window) = self.target_window else {
                return Ok(());
            };
            let hwnd = to_hwnd(window);
            if !unsafe { IsWindow(hwnd) }.as_bool() {
                return Err(StreamError::StaleWindow);
            }

            let mut rect = RECT::default();
            let dwm = unsafe {
                DwmGetWindowAttribute(
                    hwnd,
                    DWMWA_EXTENDED_FRAME_BOUNDS,
                    &mut rect as *mut _ as *mut _,
                    std::mem::size_of::<RECT>() as u32,
                )
            };
            if dwm.is_err() {
                unsafe { GetWindowRect(hwnd, &mut rect) }
                    .map_err(|_| StreamError::StaleWindow)?;
            }

            self.window_rect = from_win_rect(rect);
            Ok(())
        }

        pub(super) fn platform_copy_to_cpu(
            &mut self,
            frame: &mut CapturedFrame,
            dst: &mut RawFrame,
        ) -> Result<bool, StreamError> {
            let (Some(context), Some(staging)) =
                (self.context.clone(), self.staging_texture.clone())
            else {
                return Err(StreamError::NotInitialized);
            };
            let Some(texture) = frame.texture.clone() else {
                return Err(StreamError::Other("no acquired texture".into()));
            };

            let timer = crate::pipeline::stats::Timer::new();

            unsafe { context.CopyResource(&staging, &texture) };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe { context.Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
                .map_err(|e| StreamError::CaptureDevice(format!("Map: {e}")))?;

            let pitch = mapped.RowPitch as usize;
            let src = unsafe {
                std::slice::from_raw_parts(mapped.pData as *const u8, pitch * self.height as usize)
            };

            let copied = if self.target_window.is_some() {
                self.copy_clipped(src, pitch, dst)
            } else {
                self.copy_full(src, pitch, dst);
                Ok(true)
            };

            unsafe { context.Unmap(&staging, 0) };

            let copied = copied?;
            if copied {
                dst.pixel_format = PixelFormat::Bgra8;
                dst.timestamp_ns = frame.timestamp_ns;
                dst.frame_id = frame.frame_id;
                let samples = self.stats.frames_captured.max(1);
                self.stats.avg_copy_time_ms = (self.stats.avg_copy_time_ms
                    * (samples - 1) as f64
                    + timer.elapsed_ms())
                    / samples as f64;
            }
            Ok(copied)
        }

        fn copy_full(&self, src: &[u8], pitch: usize, dst: &mut RawFrame) {
            let total = pitch * self.height as usize;
            dst.allocate(total);
            dst.as_mut_slice()[..total].copy_from_slice(&src[..total]);
            dst.size = total;
            dst.width = self.width;
            dst.height = self.height;
            dst.stride = pitch as u32;
        }

        fn copy_clipped(
            &mut self,
            src: &[u8],
            pitch: usize,
            dst: &mut RawFrame,
        ) -> Result<bool, StreamError> {
            self.update_window_rect()?;

            let Some(clip) = crate::capture::clip_to_monitor(
                self.window_rect,
                self.monitor_rect,
                self.width,
                self.height,
            ) else {
                tracing::warn!("window too small or off-screen, skipping frame");
                return Ok(false);
            };

            let clipped_pitch = clip.width as usize * 4;
            let total = clipped_pitch * clip.height as usize;
            dst.allocate(total);

            let out = dst.as_mut_slice();
            for y in 0..clip.height as usize {
                let src_off = (clip.y as usize + y) * pitch + clip.x as usize * 4;
                let dst_off = y * clipped_pitch;
                out[dst_off..dst_off + clipped_pitch]
                    .copy_from_slice(&src[src_off..src_off + clipped_pitch]);
            }

            dst.size = total;
            dst.width = clip.width;
            dst.height = clip.height;
            dst.stride = clipped_pitch as u32;
            Ok(true)
        }

        pub(super) fn platform_release_frame(&mut self, frame: &mut CapturedFrame) {
            frame.texture = None;
            if self.frame_acquired {
                if let Some(dup) = &self.duplication {
                    let _ = unsafe { dup.ReleaseFrame() };
                }
                self.frame_acquired = false;
            }
        }

        /// List every attached monitor across all adapters.
        pub fn enumerate_monitors() -> Vec<MonitorInfo> {
            let mut monitors = Vec::new();

            let factory: IDXGIFactory1 = match unsafe { CreateDXGIFactory1() } {
                Ok(f) => f,
                Err(_) => return monitors,
            };

            let mut adapter_idx = 0u32;
            while let Ok(adapter) = unsafe { factory.EnumAdapters1(adapter_idx) } {
                let mut output_idx = 0u32;
                while let Ok(output) = unsafe { adapter.EnumOutputs(output_idx) } {
                    if let Ok(desc) = unsafe { output.GetDesc() } {
                        let mut mi = MONITORINFO {
                            cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                            ..Default::default()
                        };
                        let is_primary = unsafe { GetMonitorInfoW(desc.Monitor, &mut mi) }
                            .as_bool()
                            && (mi.dwFlags & 1) != 0;

                        monitors.push(MonitorInfo {
                            index: monitors.len() as u32,
                            name: String::from_utf16_lossy(&desc.DeviceName)
                                .trim_end_matches('\0')
                                .to_string(),
                            left: desc.DesktopCoordinates.left,
                            top: desc.DesktopCoordinates.top,
                            right: desc.DesktopCoordinates.right,
                            bottom: desc.DesktopCoordinates.bottom,
                            is_primary,
                        });
                    }
                    output_idx += 1;
                }
                adapter_idx += 1;
            }

            monitors
        }

        /// List capturable top-level windows, sorted by title.
        pub fn enumerate_windows() -> Vec<WindowInfo> {
            let mut windows_list: Vec<WindowInfo> = Vec::new();

            extern "system" fn enum_callback(
                hwnd: HWND,
                lparam: LPARAM,
            ) -> windows::Win32::Foundation::BOOL {
                let list = unsafe { &mut *(lparam.0 as *mut Vec<WindowInfo>) };

                if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
                    return true.into();
                }

                let mut title = [0u16; 512];
                let title_len = unsafe { GetWindowTextW(hwnd, &mut title) };
                if title_len == 0 {
                    return true.into();
                }

                let ex_style = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) } as u32;
                if (ex_style & WS_EX_TOOLWINDOW.0) != 0 && (ex_style & WS_EX_APPWINDOW.0) == 0 {
                    return true.into();
                }

                let mut rect = RECT::default();
                let dwm = unsafe {
                    DwmGetWindowAttribute(
                        hwnd,
                        DWMWA_EXTENDED_FRAME_BOUNDS,
                        &mut rect as *mut _ as *mut _,
                        std::mem::size_of::<RECT>() as u32,
                    )
                };
                if dwm.is_err() && unsafe { GetWindowRect(hwnd, &mut rect) }.is_err() {
                    return true.into();
                }

                // Skip tiny windows.
                if rect.right - rect.left < 100 || rect.bottom - rect.top < 100 {
                    return true.into();
                }

                let mut class_name = [0u16; 256];
                let class_len = unsafe { GetClassNameW(hwnd, &mut class_name) };
                let class = String::from_utf16_lossy(&class_name[..class_len.max(0) as usize]);
                if matches!(
                    class.as_str(),
                    "Progman" | "WorkerW" | "Shell_TrayWnd" | "Windows.UI.Core.CoreWindow"
                ) {
                    return true.into();
                }

                let mut cloaked: u32 = 0;
                let _ = unsafe {
                    DwmGetWindowAttribute(
                        hwnd,
                        DWMWA_CLOAKED,
                        &mut cloaked as *mut _ as *mut _,
                        std::mem::size_of::<u32>() as u32,
                    )
                };
                if cloaked != 0 {
                    return true.into();
                }

                let mut process_id = 0u32;
                unsafe { GetWindowThreadProcessId(hwnd, Some(&mut process_id)) };

                list.push(WindowInfo {
                    handle: WindowHandle(hwnd.0 as usize as u64),
                    title: String::from_utf16_lossy(&title[..title_len as usize]),
                    class_name: class,
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                    process_id,
                });
                true.into()
            }

            let _ = unsafe {
                EnumWindows(
                    Some(enum_callback),
                    LPARAM(&mut windows_list as *mut _ as isize),
                )
            };

            windows_list.sort_by(|a, b| a.title.cmp(&b.title));
            windows_list
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapture {
    /// Desktop duplication is only available on Windows.
    pub fn enumerate_monitors() -> Vec<MonitorInfo> {
        Vec::new()
    }

    /// Desktop duplication is only available on Windows.
    pub fn enumerate_windows() -> Vec<WindowInfo> {
        Vec::new()
    }
}

// ── CaptureSource impl ───────────────────────────────────────────

impl CaptureSource for DxgiCapture {
    fn init_monitor(&mut self, monitor_index: u32) -> Result<(), StreamError> {
        #[cfg(target_os = "windows")]
        {
            self.platform_init_monitor(monitor_index)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = monitor_index;
            Err(StreamError::Unsupported("DXGI desktop duplication"))
        }
    }

    fn init_window(&mut self, window: WindowHandle) -> Result<(), StreamError> {
        #[cfg(target_os = "windows")]
        {
            self.platform_init_window(window)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = window;
            Err(StreamError::Unsupported("DXGI desktop duplication"))
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(
        &mut self,
        frame: &mut CapturedFrame,
        timeout: Duration,
    ) -> Result<bool, StreamError> {
        #[cfg(target_os = "windows")]
        {
            self.platform_next_frame(frame, timeout)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = (frame, timeout);
            Err(StreamError::Unsupported("DXGI desktop duplication"))
        }
    }

    fn copy_to_cpu(
        &mut self,
        frame: &mut CapturedFrame,
        dst: &mut RawFrame,
    ) -> Result<bool, StreamError> {
        #[cfg(target_os = "windows")]
        {
            self.platform_copy_to_cpu(frame, dst)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = (frame, dst);
            Err(StreamError::Unsupported("DXGI desktop duplication"))
        }
    }

    fn release_frame(&mut self, frame: &mut CapturedFrame) {
        #[cfg(target_os = "windows")]
        {
            self.platform_release_frame(frame)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = frame;
        }
    }
}
