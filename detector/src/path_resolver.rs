/// Resolves a process id to the absolute path of its executable image.
///
/// The primary query asks Windows for the Win32 image path. When that fails
/// (typically for protected processes) the kernel device-namespace path
/// (`\Device\HarddiskVolume3\Games\foo.exe`) is read instead and its device
/// prefix is rewritten to a drive letter through a [`DriveDeviceMap`] built
/// once at startup.
///
/// On non-Windows platforms `/proc/<pid>/exe` is read and the device map is
/// always empty.
use tracing::trace;

/// Kernel device prefix → drive root (`\Device\HarddiskVolume3` → `C:`).
///
/// Entries are kept longest-prefix first so the most specific device wins.
#[derive(Debug, Clone, Default)]
pub struct DriveDeviceMap {
    entries: Vec<(String, String)>,
}

impl DriveDeviceMap {
    /// Builds a map from `(device_prefix, drive)` pairs. Duplicate prefixes
    /// (compared case-insensitively) keep the first drive seen.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (prefix, drive) in pairs {
            let prefix = prefix.trim_end_matches('\\').to_string();
            if prefix.is_empty() {
                continue;
            }
            if entries.iter().any(|(p, _)| p.eq_ignore_ascii_case(&prefix)) {
                continue;
            }
            entries.push((prefix, drive));
        }
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// Enumerates ready local drives and queries each drive letter's device
    /// target. Drives attached later are not picked up.
    pub fn build() -> Self {
        #[cfg(windows)]
        {
            let pairs = ('A'..='Z').filter_map(|letter| {
                let root = format!("{letter}:\\");
                if !std::path::Path::new(&root).exists() {
                    return None;
                }
                let drive = format!("{letter}:");
                let device = imp::query_dos_device(&drive)?;
                trace!(%drive, %device, "mapped drive");
                Some((device, drive))
            });
            let map = Self::new(pairs.collect::<Vec<_>>());
            tracing::debug!(drives = map.len(), "built drive device map");
            map
        }

        #[cfg(not(windows))]
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites the device prefix of `device_path` to its drive letter.
    ///
    /// A prefix only matches on a path-component boundary, so
    /// `\Device\HarddiskVolume1` never claims `\Device\HarddiskVolume10\...`.
    /// Returns the input unchanged when no prefix matches.
    pub fn rewrite(&self, device_path: &str) -> String {
        for (prefix, drive) in &self.entries {
            let Some(head) = device_path.get(..prefix.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(prefix) {
                continue;
            }
            let rest = &device_path[prefix.len()..];
            if rest.is_empty() || rest.starts_with('\\') {
                return format!("{drive}{rest}");
            }
        }
        device_path.to_string()
    }
}

/// True for paths still in kernel device-namespace form. These cannot be
/// matched against user lists and must be treated as unresolved.
pub fn is_device_path(path: &str) -> bool {
    path.get(..8)
        .is_some_and(|head| head.eq_ignore_ascii_case(r"\Device\"))
}

/// Turns process ids into executable paths.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    drives: DriveDeviceMap,
}

impl PathResolver {
    pub fn new(drives: DriveDeviceMap) -> Self {
        Self { drives }
    }

    /// Returns the executable path of `pid`, or `None` if the process has
    /// exited or access was denied. Never panics on a vanished process.
    pub fn resolve(&self, pid: u32) -> Option<String> {
        #[cfg(windows)]
        {
            let process = imp::ProcessHandle::open(pid)?;
            if let Some(path) = process.win32_image_path() {
                return Some(path);
            }
            let device_path = process.device_image_path()?;
            let rewritten = self.drives.rewrite(&device_path);
            tracing::debug!(pid, %device_path, %rewritten, "resolved via device path");
            Some(rewritten)
        }

        #[cfg(not(windows))]
        {
            match std::fs::read_link(format!("/proc/{pid}/exe")) {
                Ok(path) => Some(path.to_string_lossy().into_owned()),
                Err(err) => {
                    trace!(pid, %err, "could not read process image");
                    None
                }
            }
        }
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Storage::FileSystem::QueryDosDeviceW;
    use windows::Win32::System::ProcessStatus::GetProcessImageFileNameW;
    use windows::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
        PROCESS_QUERY_LIMITED_INFORMATION,
    };

    const PATH_BUF_LEN: usize = 1024;

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Limited-access process handle, closed on drop.
    pub struct ProcessHandle(HANDLE);

    impl ProcessHandle {
        pub fn open(pid: u32) -> Option<Self> {
            let handle =
                unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }.ok()?;
            if handle.is_invalid() {
                return None;
            }
            Some(Self(handle))
        }

        pub fn win32_image_path(&self) -> Option<String> {
            let mut buf = vec![0u16; PATH_BUF_LEN];
            let mut size = buf.len() as u32;
            unsafe {
                QueryFullProcessImageNameW(
                    self.0,
                    PROCESS_NAME_WIN32,
                    PWSTR(buf.as_mut_ptr()),
                    &mut size,
                )
            }
            .ok()?;
            if size == 0 {
                return None;
            }
            Some(String::from_utf16_lossy(&buf[..size as usize]))
        }

        pub fn device_image_path(&self) -> Option<String> {
            let mut buf = vec![0u16; PATH_BUF_LEN];
            let len = unsafe { GetProcessImageFileNameW(self.0, &mut buf) } as usize;
            if len == 0 {
                return None;
            }
            Some(String::from_utf16_lossy(&buf[..len]))
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Returns the first device target of `drive` (e.g. `"C:"`).
    pub fn query_dos_device(drive: &str) -> Option<String> {
        let name = to_wide(drive);
        let mut buf = vec![0u16; PATH_BUF_LEN];
        let len = unsafe { QueryDosDeviceW(PCWSTR::from_raw(name.as_ptr()), Some(&mut buf)) };
        if len == 0 {
            return None;
        }
        // The result is a NUL-separated multi-string; the first entry is current.
        let first = buf[..len as usize].split(|&c| c == 0).next()?;
        if first.is_empty() {
            return None;
        }
        Some(String::from_utf16_lossy(first))
    }
}
