/// Record / do-not-record policy for a single executable.
///
/// Rules are evaluated top-down and the first match wins:
///
/// 1. no path, or a recording is already active → skip
/// 2. allow list → record (beats every other rule)
/// 3. deny list → skip
/// 4. built-in blocked path fragments (overlays, wallpaper tools) → skip
/// 5. catalog match → record under the catalog name
/// 6. anti-cheat / launcher file description → skip
/// 7. Steam library install directory → record; anything else → skip
///
/// `decide` keeps no state between calls; callers pass fresh lists and a
/// fresh catalog snapshot every time.
use serde::Serialize;
use std::path::Path;

use crate::catalog::{normalize_path, GameCatalog};
use crate::host::{AllowListEntry, DenyListEntry};
use crate::platform::FileMetadata;
use crate::steam;

/// Path fragments of tools that must never be recorded (matched against the
/// lower-cased, `/`-separated path).
pub const BLOCKED_PATH_FRAGMENTS: &[&str] = &[
    "wallpaper_engine",
    "wallpaper32.exe",
    "wallpaper64.exe",
    "/nvidia corporation/",
    "/overwolf/",
    "/rivatuner statistics server/",
    "/msi afterburner/",
    "/windows/system32/",
];

/// File-description substrings identifying anti-cheat services and launchers.
pub const BLOCKED_DESCRIPTIONS: &[&str] = &[
    "anticheat",
    "anti-cheat",
    "battleye",
    "loader",
    "launcher",
    "crash report",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    NoPath,
    AlreadyRecording,
    AllowListed,
    DenyListed,
    BlockedPath,
    KnownGame,
    AntiCheat,
    SteamLibrary,
    Unrecognized,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoPath => "no path",
            Self::AlreadyRecording => "already recording",
            Self::AllowListed => "allow-listed",
            Self::DenyListed => "deny-listed",
            Self::BlockedPath => "blocked path",
            Self::KnownGame => "known game",
            Self::AntiCheat => "anti-cheat or launcher",
            Self::SteamLibrary => "steam library",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub should_record: bool,
    pub resolved_game_name: Option<String>,
    pub reason: Reason,
}

impl Verdict {
    fn skip(reason: Reason) -> Self {
        Self {
            should_record: false,
            resolved_game_name: None,
            reason,
        }
    }

    fn record(name: String, reason: Reason) -> Self {
        Self {
            should_record: true,
            resolved_game_name: Some(name),
            reason,
        }
    }
}

/// Everything a decision depends on besides the path itself.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub allow: &'a [AllowListEntry],
    pub deny: &'a [DenyListEntry],
    pub catalog: &'a GameCatalog,
    /// A recording or pre-recording is already running.
    pub recording_active: bool,
}

pub fn decide<M>(exe_path: &str, input: &DecisionInput<'_>, metadata: &M) -> Verdict
where
    M: FileMetadata + ?Sized,
{
    if exe_path.trim().is_empty() {
        return Verdict::skip(Reason::NoPath);
    }
    if input.recording_active {
        return Verdict::skip(Reason::AlreadyRecording);
    }

    if let Some(entry) = input.allow.iter().find(|e| e.matches(exe_path)) {
        let name = Some(entry.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| resolve_game_name(exe_path));
        return Verdict::record(name, Reason::AllowListed);
    }

    if input.deny.iter().any(|e| e.matches(exe_path)) {
        return Verdict::skip(Reason::DenyListed);
    }

    let normalized = normalize_path(exe_path);
    if BLOCKED_PATH_FRAGMENTS.iter().any(|f| normalized.contains(f)) {
        return Verdict::skip(Reason::BlockedPath);
    }

    if let Some(name) = input.catalog.name_for(exe_path) {
        return Verdict::record(name.to_string(), Reason::KnownGame);
    }

    if let Some(description) = metadata.file_description(exe_path) {
        if is_blocked_description(&description) {
            return Verdict::skip(Reason::AntiCheat);
        }
    }

    if steam::is_library_path(exe_path) {
        return Verdict::record(resolve_game_name(exe_path), Reason::SteamLibrary);
    }

    Verdict::skip(Reason::Unrecognized)
}

pub fn is_blocked_description(description: &str) -> bool {
    let description = description.to_lowercase();
    BLOCKED_DESCRIPTIONS.iter().any(|b| description.contains(b))
}

/// Steam manifest name if available, otherwise the file name without extension.
pub fn resolve_game_name(exe_path: &str) -> String {
    steam::app_name_for(exe_path).unwrap_or_else(|| file_stem(exe_path))
}

fn file_stem(exe_path: &str) -> String {
    let normalized = exe_path.replace('\\', "/");
    Path::new(&normalized)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogRecord;
    use crate::host::ListEntry;

    struct Description(Option<&'static str>);

    impl FileMetadata for Description {
        fn file_description(&self, _exe_path: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    const NONE: Description = Description(None);

    fn catalog(name: &str, executables: &[&str]) -> GameCatalog {
        GameCatalog::from_records([CatalogRecord {
            name: name.to_string(),
            executables: executables.iter().map(|s| s.to_string()).collect(),
        }])
    }

    fn input<'a>(
        allow: &'a [ListEntry],
        deny: &'a [ListEntry],
        catalog: &'a GameCatalog,
    ) -> DecisionInput<'a> {
        DecisionInput {
            allow,
            deny,
            catalog,
            recording_active: false,
        }
    }

    // ── rule 1 ────────────────────────────────────────────────────────────────

    #[test]
    fn empty_path_is_skipped() {
        let empty = GameCatalog::empty();
        let v = decide("", &input(&[], &[], &empty), &NONE);
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::NoPath);
    }

    #[test]
    fn active_recording_blocks_even_allow_listed() {
        let empty = GameCatalog::empty();
        let allow = [ListEntry::new("Foo", r"C:\Games\foo.exe")];
        let mut i = input(&allow, &[], &empty);
        i.recording_active = true;
        let v = decide(r"C:\Games\foo.exe", &i, &NONE);
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::AlreadyRecording);
    }

    // ── rules 2-4 ─────────────────────────────────────────────────────────────

    #[test]
    fn allow_list_beats_deny_list_and_fragments() {
        let empty = GameCatalog::empty();
        let path = r"C:\Program Files\Wallpaper_Engine\wallpaper64.exe";
        let allow = [ListEntry::new("Wallpaper", path)];
        let deny = [ListEntry::new("Wallpaper", path)];
        let v = decide(path, &input(&allow, &deny, &empty), &Description(Some("Launcher")));
        assert!(v.should_record);
        assert_eq!(v.reason, Reason::AllowListed);
        assert_eq!(v.resolved_game_name.as_deref(), Some("Wallpaper"));
    }

    #[test]
    fn allow_list_without_name_falls_back_to_file_stem() {
        let empty = GameCatalog::empty();
        let allow = [ListEntry::new("", r"C:\Tools\thing.exe")];
        let v = decide(r"c:\tools\THING.exe", &input(&allow, &[], &empty), &NONE);
        assert_eq!(v.resolved_game_name.as_deref(), Some("THING"));
    }

    #[test]
    fn deny_list_beats_catalog() {
        let cat = catalog("Foo Game", &["foo.exe"]);
        let deny = [ListEntry::new("", r"C:\Games\Foo\foo.exe")];
        let v = decide(r"C:\GAMES\Foo\foo.exe", &input(&[], &deny, &cat), &NONE);
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::DenyListed);
    }

    #[test]
    fn wallpaper_engine_is_blocked() {
        let empty = GameCatalog::empty();
        let v = decide(
            r"C:\Program Files (x86)\Steam\steamapps\common\wallpaper_engine\wallpaper32.exe",
            &input(&[], &[], &empty),
            &NONE,
        );
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::BlockedPath);
    }

    #[test]
    fn blocked_fragment_beats_catalog() {
        let cat = catalog("Overlay", &["overlay.exe"]);
        let v = decide(
            r"C:\Program Files\Overwolf\overlay.exe",
            &input(&[], &[], &cat),
            &NONE,
        );
        assert_eq!(v.reason, Reason::BlockedPath);
    }

    // ── rule 5 ────────────────────────────────────────────────────────────────

    #[test]
    fn catalog_match_records_with_canonical_name() {
        let cat = catalog("Foo Game", &["foo.exe"]);
        let v = decide("C:/Games/Foo/foo.exe", &input(&[], &[], &cat), &NONE);
        assert!(v.should_record);
        assert_eq!(v.reason, Reason::KnownGame);
        assert_eq!(v.resolved_game_name.as_deref(), Some("Foo Game"));
    }

    #[test]
    fn catalog_match_ignores_launcher_description() {
        let cat = catalog("Foo Game", &["foo.exe"]);
        let v = decide(
            "C:/Games/Foo/foo.exe",
            &input(&[], &[], &cat),
            &Description(Some("Foo Launcher")),
        );
        assert!(v.should_record);
    }

    // ── rule 6 ────────────────────────────────────────────────────────────────

    #[test]
    fn anticheat_description_is_blocked() {
        let empty = GameCatalog::empty();
        let v = decide(
            r"C:\Riot Games\Riot Vanguard\vgc.exe",
            &input(&[], &[], &empty),
            &Description(Some("Riot Anticheat Loader")),
        );
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::AntiCheat);
    }

    #[test]
    fn anticheat_description_beats_steam_fallback() {
        let empty = GameCatalog::empty();
        let v = decide(
            r"D:\SteamLibrary\steamapps\common\Bar\EasyAntiCheat\EasyAntiCheat_EOS_Setup.exe",
            &input(&[], &[], &empty),
            &Description(Some("EasyAntiCheat Service")),
        );
        assert_eq!(v.reason, Reason::AntiCheat);
    }

    #[test]
    fn description_matching_is_case_insensitive() {
        assert!(is_blocked_description("BattlEye Service"));
        assert!(is_blocked_description("GAME LAUNCHER"));
        assert!(!is_blocked_description("Bar: The Game"));
        assert!(!is_blocked_description(""));
    }

    // ── rule 7 ────────────────────────────────────────────────────────────────

    #[test]
    fn steam_library_records_with_file_stem_when_no_manifest() {
        let empty = GameCatalog::empty();
        let v = decide(
            r"Z:\nowhere\steamapps\common\Bar\bar.exe",
            &input(&[], &[], &empty),
            &NONE,
        );
        assert!(v.should_record);
        assert_eq!(v.reason, Reason::SteamLibrary);
        assert_eq!(v.resolved_game_name.as_deref(), Some("bar"));
    }

    #[test]
    fn steam_library_uses_manifest_name() {
        let dir = tempfile::tempdir().unwrap();
        let steamapps = dir.path().join("steamapps");
        std::fs::create_dir_all(steamapps.join("common").join("Bar")).unwrap();
        std::fs::write(
            steamapps.join("appmanifest_42.acf"),
            "\"AppState\" { \"name\" \"Bar Deluxe\" \"installdir\" \"Bar\" }",
        )
        .unwrap();
        let exe = steamapps.join("common").join("Bar").join("bar.exe");

        let empty = GameCatalog::empty();
        let v = decide(&exe.to_string_lossy(), &input(&[], &[], &empty), &NONE);
        assert_eq!(v.resolved_game_name.as_deref(), Some("Bar Deluxe"));
    }

    #[test]
    fn non_ascii_steam_path_records_with_file_stem() {
        let empty = GameCatalog::empty();
        let v = decide(
            r"F:\BIBLIOTHÈQUE\SteamApps\Common\ÉTÉ\Été.exe",
            &input(&[], &[], &empty),
            &NONE,
        );
        assert_eq!(v.reason, Reason::SteamLibrary);
        assert_eq!(v.resolved_game_name.as_deref(), Some("Été"));
    }

    #[test]
    fn unmatched_path_is_skipped() {
        let empty = GameCatalog::empty();
        let v = decide(r"C:\Tools\editor.exe", &input(&[], &[], &empty), &NONE);
        assert!(!v.should_record);
        assert_eq!(v.reason, Reason::Unrecognized);
        assert_eq!(v.resolved_game_name, None);
    }

    // ── properties over a small path corpus ───────────────────────────────────

    const PATHS: &[&str] = &[
        r"C:\Games\Foo\foo.exe",
        r"D:\SteamLibrary\steamapps\common\Bar\bar.exe",
        r"C:\Program Files\Wallpaper_Engine\wallpaper64.exe",
        r"C:\Windows\System32\notepad.exe",
        r"E:\Tools\thing.exe",
        r"F:\BIBLIOTHÈQUE\SteamApps\Common\ÉTÉ\Été.exe",
        r"G:\JEUX\WALLPAPER_ENGINE\ÉCRAN.exe",
    ];

    #[test]
    fn every_allow_listed_path_records() {
        let cat = catalog("Foo Game", &["foo.exe"]);
        for path in PATHS {
            let allow = [ListEntry::new("x", *path)];
            let deny = [ListEntry::new("x", *path)];
            let v = decide(path, &input(&allow, &deny, &cat), &Description(Some("anticheat")));
            assert!(v.should_record, "{path} should record");
        }
    }

    #[test]
    fn every_deny_listed_path_skips() {
        let cat = catalog("Foo Game", &["foo.exe"]);
        for path in PATHS {
            let deny = [ListEntry::new("x", *path)];
            let v = decide(path, &input(&[], &deny, &cat), &NONE);
            assert!(!v.should_record, "{path} should not record");
        }
    }

    #[test]
    fn only_steam_paths_record_without_other_rules() {
        let empty = GameCatalog::empty();
        for path in PATHS {
            let v = decide(path, &input(&[], &[], &empty), &NONE);
            assert_eq!(v.should_record, steam::is_library_path(path), "{path}");
        }
    }
}
