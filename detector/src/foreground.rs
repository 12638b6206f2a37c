/// Foreground-window change detection.
///
/// Two sources feed the engine:
///   - [`ForegroundListener`]: an `EVENT_SYSTEM_FOREGROUND` WinEvent hook on a
///     dedicated OS thread with its own message pump. Out-of-context WinEvent
///     callbacks are delivered on the thread that installed the hook, so that
///     thread must keep pumping messages for as long as the hook lives.
///   - [`run_poll_timer`]: a periodic fallback that asks the engine to sample
///     the current foreground process, for transitions the hook misses.
///
/// On non-Windows platforms the listener fails to start and the engine runs
/// in poll-only mode.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::error::Result;
use crate::event::DetectorEvent;

/// A native notification source with a clean start/stop lifecycle.
pub trait PlatformListener: Send {
    /// Starts listening. Calling `start` on a running listener is a no-op.
    fn start(&mut self) -> Result<()>;
    /// Stops listening and waits (bounded) for the native thread to exit.
    /// Calling `stop` on a stopped listener is a no-op.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

pub struct ForegroundListener {
    #[cfg_attr(not(windows), allow(dead_code))]
    tx: mpsc::Sender<DetectorEvent>,
    #[cfg_attr(not(windows), allow(dead_code))]
    join_timeout: Duration,
    #[cfg(windows)]
    pump: Option<Pump>,
}

#[cfg(windows)]
struct Pump {
    thread: std::thread::JoinHandle<()>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    thread_id: u32,
    /// Signalled by the pump thread right before it exits.
    done_rx: std::sync::mpsc::Receiver<()>,
}

impl ForegroundListener {
    pub fn new(tx: mpsc::Sender<DetectorEvent>, join_timeout: Duration) -> Self {
        Self {
            tx,
            join_timeout,
            #[cfg(windows)]
            pump: None,
        }
    }
}

#[cfg(windows)]
impl PlatformListener for ForegroundListener {
    fn start(&mut self) -> Result<()> {
        use crate::error::Error;
        use std::sync::mpsc as std_mpsc;

        if self.pump.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<u32, String>>(1);
        let (done_tx, done_rx) = std_mpsc::sync_channel::<()>(1);
        let tx = self.tx.clone();
        let thread = std::thread::Builder::new()
            .name("foreground-hook".into())
            .spawn(move || {
                imp::run_message_pump(tx, ready_tx);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::ListenerStart(format!("failed to spawn hook thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                self.pump = Some(Pump {
                    thread,
                    thread_id,
                    done_rx,
                });
                tracing::info!("foreground hook installed");
                Ok(())
            }
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(Error::ListenerStart(msg))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::ListenerStart(
                    "hook thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        use std::sync::mpsc::RecvTimeoutError;

        let Some(pump) = self.pump.take() else {
            return;
        };
        imp::post_quit(pump.thread_id);
        match pump.done_rx.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = pump.thread.join();
                tracing::info!("foreground hook removed");
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "foreground hook thread did not exit in time; abandoning it"
                );
            }
        }
    }

    fn is_running(&self) -> bool {
        self.pump.is_some()
    }
}

#[cfg(not(windows))]
impl PlatformListener for ForegroundListener {
    fn start(&mut self) -> Result<()> {
        Err(crate::error::Error::ListenerStart(
            "foreground window events are only available on Windows".to_string(),
        ))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

impl Drop for ForegroundListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends [`DetectorEvent::ForegroundPoll`] every `period`.
///
/// `in_flight` is set when a poll is sent and cleared by the consumer once it
/// has been handled; ticks that arrive while it is set are skipped, so polls
/// never overlap or pile up in the channel.
pub async fn run_poll_timer(
    period: Duration,
    tx: mpsc::Sender<DetectorEvent>,
    in_flight: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = stop.changed() => {
                if res.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        if in_flight.swap(true, Ordering::AcqRel) {
            trace!("previous foreground poll still pending; skipping tick");
            continue;
        }

        tokio::select! {
            res = tx.send(DetectorEvent::ForegroundPoll) => {
                if res.is_err() {
                    in_flight.store(false, Ordering::Release);
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }
    debug!("foreground poll timer stopped");
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::cell::RefCell;
    use std::sync::mpsc as std_mpsc;
    use tokio::sync::mpsc;

    use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, EVENT_SYSTEM_FOREGROUND,
        MSG, PM_NOREMOVE, WINEVENT_OUTOFCONTEXT, WINEVENT_SKIPOWNPROCESS, WM_QUIT, WM_USER,
    };

    use crate::event::DetectorEvent;
    use crate::platform::window_pid;

    thread_local! {
        /// Sender used by the hook callback. Set only on the pump thread.
        static HOOK_TX: RefCell<Option<mpsc::Sender<DetectorEvent>>> = const { RefCell::new(None) };
    }

    unsafe extern "system" fn win_event_proc(
        _hook: HWINEVENTHOOK,
        event: u32,
        hwnd: HWND,
        _id_object: i32,
        _id_child: i32,
        _event_thread: u32,
        _event_time: u32,
    ) {
        if event != EVENT_SYSTEM_FOREGROUND {
            return;
        }
        let Some(pid) = window_pid(hwnd) else {
            return;
        };
        HOOK_TX.with(|slot| {
            if let Some(tx) = slot.borrow().as_ref() {
                // Non-blocking; a full channel drops this change and the poll catches up.
                if tx.try_send(DetectorEvent::ForegroundChanged { pid }).is_err() {
                    tracing::trace!(pid, "dropped foreground change");
                }
            }
        });
    }

    /// Installs the WinEvent hook, reports the thread ID (or an error) on
    /// `ready`, then pumps messages until `WM_QUIT`.
    pub fn run_message_pump(
        tx: mpsc::Sender<DetectorEvent>,
        ready: std_mpsc::SyncSender<Result<u32, String>>,
    ) {
        HOOK_TX.with(|slot| *slot.borrow_mut() = Some(tx));

        unsafe {
            let mut msg = MSG::default();
            // Force creation of this thread's message queue before anyone posts to it.
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);

            let hook = SetWinEventHook(
                EVENT_SYSTEM_FOREGROUND,
                EVENT_SYSTEM_FOREGROUND,
                HMODULE::default(),
                Some(win_event_proc),
                0,
                0,
                WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
            );
            if hook.0 == 0 {
                let _ = ready.send(Err("SetWinEventHook(EVENT_SYSTEM_FOREGROUND) failed".into()));
                HOOK_TX.with(|slot| slot.borrow_mut().take());
                return;
            }
            let _ = ready.send(Ok(GetCurrentThreadId()));
            drop(ready);

            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = UnhookWinEvent(hook);
        }

        HOOK_TX.with(|slot| slot.borrow_mut().take());
        tracing::debug!("foreground hook thread exited");
    }

    /// Posts `WM_QUIT` to `thread_id`, causing its `GetMessageW` loop to exit.
    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}
