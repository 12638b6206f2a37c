/// OS queries the detector needs, behind a trait so the engine can be driven
/// by fakes in tests.
///
/// [`NativeProbe`] is the real implementation. On non-Windows platforms it can
/// still resolve executable paths (via `/proc`) but reports no foreground
/// window and no file metadata.
use crate::path_resolver::{DriveDeviceMap, PathResolver};

/// Read-only access to executable metadata.
pub trait FileMetadata {
    /// The `FileDescription` string from the executable's version resource.
    fn file_description(&self, exe_path: &str) -> Option<String>;
}

pub trait SystemProbe: FileMetadata + Send + Sync {
    /// Absolute executable path of `pid`, if it can be read.
    fn exe_path(&self, pid: u32) -> Option<String>;
    /// Process id owning the current foreground window.
    fn foreground_pid(&self) -> Option<u32>;
}

#[derive(Debug, Clone, Default)]
pub struct NativeProbe {
    resolver: PathResolver,
}

impl NativeProbe {
    /// Builds the drive device map. Call once at startup.
    pub fn new() -> Self {
        Self {
            resolver: PathResolver::new(DriveDeviceMap::build()),
        }
    }
}

impl FileMetadata for NativeProbe {
    fn file_description(&self, exe_path: &str) -> Option<String> {
        #[cfg(windows)]
        {
            imp::file_description(exe_path)
        }

        #[cfg(not(windows))]
        {
            let _ = exe_path;
            None
        }
    }
}

impl SystemProbe for NativeProbe {
    fn exe_path(&self, pid: u32) -> Option<String> {
        self.resolver.resolve(pid)
    }

    fn foreground_pid(&self) -> Option<u32> {
        #[cfg(windows)]
        {
            imp::foreground_pid()
        }

        #[cfg(not(windows))]
        None
    }
}

#[cfg(windows)]
pub(crate) use imp::window_pid;

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Storage::FileSystem::{
        GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

    /// en-US / Unicode, used when the resource has no translation table.
    const DEFAULT_TRANSLATION: (u16, u16) = (0x0409, 0x04B0);

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn window_pid(hwnd: HWND) -> Option<u32> {
        if hwnd.0 == 0 {
            return None;
        }
        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
        (pid != 0).then_some(pid)
    }

    pub fn foreground_pid() -> Option<u32> {
        window_pid(unsafe { GetForegroundWindow() })
    }

    /// Returns the raw bytes of `sub_block` inside a version-info block.
    fn query_value<'a>(block: &'a [u8], sub_block: &str) -> Option<&'a [u8]> {
        let key = to_wide(sub_block);
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let mut len = 0u32;
        let ok = unsafe {
            VerQueryValueW(
                block.as_ptr().cast(),
                PCWSTR::from_raw(key.as_ptr()),
                &mut ptr,
                &mut len,
            )
        };
        if !ok.as_bool() || ptr.is_null() || len == 0 {
            return None;
        }
        // The returned pointer aliases `block`.
        let start = (ptr as usize).checked_sub(block.as_ptr() as usize)?;
        block.get(start..)
    }

    pub fn file_description(path: &str) -> Option<String> {
        let wide = to_wide(path);
        let name = PCWSTR::from_raw(wide.as_ptr());

        let size = unsafe { GetFileVersionInfoSizeW(name, None) };
        if size == 0 {
            return None;
        }
        let mut block = vec![0u8; size as usize];
        unsafe { GetFileVersionInfoW(name, 0, size, block.as_mut_ptr().cast()) }.ok()?;

        let (lang, codepage) = query_value(&block, r"\VarFileInfo\Translation")
            .filter(|bytes| bytes.len() >= 4)
            .map(|b| (u16::from_le_bytes([b[0], b[1]]), u16::from_le_bytes([b[2], b[3]])))
            .unwrap_or(DEFAULT_TRANSLATION);

        let key = format!(r"\StringFileInfo\{lang:04x}{codepage:04x}\FileDescription");
        let bytes = query_value(&block, &key)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        let text = String::from_utf16_lossy(&units).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}
