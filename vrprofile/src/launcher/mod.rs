use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_default::DefaultFromSerde;

use crate::{
    error::{Error, Result},
    locations::Locations,
    process::{ProcessMatcher, ProcessProbe, check_running},
    transfer::write_atomic,
};

pub mod options;
pub mod vdf;

pub use options::LaunchOptions;

pub const DATA_PATH_FLAG: &str = "-DataPath";
pub const CACHE_PATH_FLAG: &str = "-CachePath";
const LAUNCH_OPTIONS_KEY: &str = "LaunchOptions";
const APPS_PATH: &[&str] = &["UserLocalConfigStore", "Software", "Valve", "Steam", "apps"];

/// Data and cache directories an application is launched with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPair {
    pub data: PathBuf,
    pub cache: PathBuf,
}

impl DirectoryPair {
    pub fn under(dir: &Path) -> Self {
        Self {
            data: dir.join("data"),
            cache: dir.join("cache"),
        }
    }

    pub fn create(&self) -> anyhow::Result<()> {
        for dir in [&self.data, &self.cache] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {dir:?}"))?;
        }
        Ok(())
    }
}

/// Steam's per-user configuration holding launch options
#[derive(Clone, Debug, Serialize, Deserialize, DefaultFromSerde)]
pub struct LauncherConfig {
    /// `localconfig.vdf`, found below `<steam>/userdata` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    /// Application whose launch options are rewritten
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Launcher processes; the launcher rewrites its configuration on exit
    #[serde(default = "default_process_names")]
    pub process_names: Vec<String>,
}

fn default_app_id() -> String {
    "2519830".to_string()
}

fn default_process_names() -> Vec<String> {
    vec!["steam.exe".to_string()]
}

impl LauncherConfig {
    pub fn matchers(&self) -> Vec<ProcessMatcher> {
        self.process_names
            .iter()
            .map(ProcessMatcher::named)
            .collect()
    }

    /// Configured path, or the `localconfig.vdf` of the account Steam
    /// last signed in with. Falls back to the most recently modified
    /// `<steam>/userdata/<user>/config/localconfig.vdf`.
    pub fn config_path(&self, locations: &Locations) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.config_path {
            return Ok(path.clone());
        }
        let steam = locations
            .steam
            .as_ref()
            .context("no Steam installation found, set launcher.config_path")?;
        let userdata = steam.join("userdata");
        match active_account(steam) {
            Ok(account) => {
                let path = userdata
                    .join(account.to_string())
                    .join("config")
                    .join("localconfig.vdf");
                if path.is_file() {
                    return Ok(path);
                }
                log::debug!("active account has no {path:?}");
            }
            Err(e) => log::debug!("failed to find the active Steam account: {e:#}"),
        }

        let entries = fs::read_dir(&userdata)
            .with_context(|| format!("failed to open directory {userdata:?}"))?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read entry of {userdata:?}"))?;
            let candidate = entry.path().join("config").join("localconfig.vdf");
            let Ok(modified) = fs::metadata(&candidate).and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
                newest = Some((modified, candidate));
            }
        }
        newest
            .map(|(_, path)| path)
            .with_context(|| format!("no localconfig.vdf below {userdata:?}"))
    }
}

/// Offset between a 64-bit Steam ID and the account id naming `userdata`
const STEAM_ID_BASE: u64 = 76_561_197_960_265_728;

/// Account id of the `MostRecent` user in `<steam>/config/loginusers.vdf`,
/// or of the user with the newest `Timestamp`.
fn active_account(steam: &Path) -> anyhow::Result<u64> {
    let path = steam.join("config").join("loginusers.vdf");
    let text = fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
    let root = vdf::parse(&text).with_context(|| format!("failed to parse {path:?}"))?;
    let users = root
        .object("users")
        .with_context(|| format!("no users in {path:?}"))?;
    let timestamp = |user: &vdf::Object| {
        user.string("Timestamp")
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or_default()
    };
    let (steam_id, _) = users
        .objects()
        .max_by_key(|(_, user)| (user.string("MostRecent") == Some("1"), timestamp(user)))
        .with_context(|| format!("no users in {path:?}"))?;
    let steam_id: u64 = steam_id
        .parse()
        .with_context(|| format!("invalid Steam ID {steam_id:?}"))?;
    steam_id
        .checked_sub(STEAM_ID_BASE)
        .with_context(|| format!("invalid Steam ID {steam_id}"))
}

/// Rewrites the launch options of one application in the launcher's
/// configuration file
#[derive(Debug)]
pub struct Patcher<'a> {
    pub config: &'a LauncherConfig,
    pub locations: &'a Locations,
    pub probe: &'a dyn ProcessProbe,
}

impl Patcher<'_> {
    fn path(&self) -> Result<PathBuf> {
        self.config
            .config_path(self.locations)
            .map_err(|source| Error::PatchFailed {
                path: PathBuf::from("localconfig.vdf"),
                source,
            })
    }

    /// Points the application at `pair`, or removes both path flags when
    /// `pair` is `None`. Tokens of `extra` are added when missing.
    ///
    /// Returns whether the file was written. The file is left untouched
    /// on any error.
    pub fn patch(&self, pair: Option<&DirectoryPair>, extra: Option<&str>) -> Result<bool> {
        let running =
            check_running(self.probe, &self.config.matchers()).map_err(Error::ProcessCheck)?;
        if !running.is_empty() {
            return Err(Error::AppsStillRunning {
                names: running.into_iter().collect(),
            });
        }
        let path = self.path()?;
        let failed = |source: anyhow::Error| Error::PatchFailed {
            path: path.clone(),
            source,
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {path:?}"))
            .map_err(failed)?;
        let mut root = vdf::parse(&text)
            .with_context(|| format!("failed to parse {path:?}"))
            .map_err(failed)?;
        let app_id = &self.config.app_id;
        let app = root
            .path_mut(APPS_PATH)
            .and_then(|apps| apps.object_mut(app_id))
            .with_context(|| format!("application {app_id} not found in {path:?}"))
            .map_err(failed)?;

        let current = app.string(LAUNCH_OPTIONS_KEY).unwrap_or_default().to_string();
        let mut options = LaunchOptions::parse(&current);
        let data = pair.map(|p| p.data.to_string_lossy().into_owned());
        let cache = pair.map(|p| p.cache.to_string_lossy().into_owned());
        options.set_flag(DATA_PATH_FLAG, data.as_deref());
        options.set_flag(CACHE_PATH_FLAG, cache.as_deref());
        if let Some(extra) = extra {
            options.ensure_tokens(extra);
        }
        let rendered = options.render();
        if rendered == current {
            log::info!("launch options of {app_id} already up to date");
            return Ok(false);
        }
        app.set_string(LAUNCH_OPTIONS_KEY, rendered.clone());
        write_atomic(&path, root.write().as_bytes()).map_err(failed)?;
        log::info!("patched launch options of {app_id} in {path:?}: {rendered}");
        Ok(true)
    }

    /// Directory pair the launch options currently carry.
    pub fn current(&self) -> Result<Option<DirectoryPair>> {
        let path = self.path()?;
        let failed = |source: anyhow::Error| Error::PatchFailed {
            path: path.clone(),
            source,
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {path:?}"))
            .map_err(failed)?;
        let root = vdf::parse(&text)
            .with_context(|| format!("failed to parse {path:?}"))
            .map_err(failed)?;
        let app_id = &self.config.app_id;
        let app = root
            .path(APPS_PATH)
            .and_then(|apps| apps.object(app_id))
            .with_context(|| format!("application {app_id} not found in {path:?}"))
            .map_err(failed)?;
        let options = LaunchOptions::parse(app.string(LAUNCH_OPTIONS_KEY).unwrap_or_default());
        Ok(
            match (
                options.flag_value(DATA_PATH_FLAG),
                options.flag_value(CACHE_PATH_FLAG),
            ) {
                (Some(data), Some(cache)) => Some(DirectoryPair {
                    data: data.into(),
                    cache: cache.into(),
                }),
                _ => None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::FixedProbe;

    const LOCALCONFIG: &str = r#""UserLocalConfigStore"
{
	"Software"
	{
		"Valve"
		{
			"Steam"
			{
				"apps"
				{
					"2519830"
					{
						"LaunchOptions"		"-SkipIntroTutorial %command%"
					}
					"440"
					{
						"LaunchOptions"		"-novid"
					}
				}
			}
		}
	}
}
"#;

    struct Fixture {
        _root: tempfile::TempDir,
        path: PathBuf,
        config: LauncherConfig,
        locations: Locations,
        probe: FixedProbe,
    }

    impl Fixture {
        fn new(content: &str) -> Self {
            let root = tempfile::tempdir().unwrap();
            let path = root.path().join("localconfig.vdf");
            fs::write(&path, content).unwrap();
            let config = LauncherConfig {
                config_path: Some(path.clone()),
                ..Default::default()
            };
            Self {
                locations: Locations::under(root.path()),
                _root: root,
                path,
                config,
                probe: FixedProbe::new(),
            }
        }

        fn patcher(&self) -> Patcher<'_> {
            Patcher {
                config: &self.config,
                locations: &self.locations,
                probe: &self.probe,
            }
        }
    }

    fn pair() -> DirectoryPair {
        DirectoryPair {
            data: "/srv/work/data".into(),
            cache: "/srv/work/cache".into(),
        }
    }

    #[test]
    fn patch_is_idempotent_and_keeps_other_flags() {
        let fx = Fixture::new(LOCALCONFIG);
        assert!(fx.patcher().patch(Some(&pair()), None).unwrap());
        let first = fs::read_to_string(&fx.path).unwrap();
        assert!(!fx.patcher().patch(Some(&pair()), None).unwrap());
        let second = fs::read_to_string(&fx.path).unwrap();
        assert_eq!(first, second);

        assert!(first.contains(
            r#""-SkipIntroTutorial %command% -DataPath \"/srv/work/data\" -CachePath \"/srv/work/cache\"""#
        ));
        assert!(first.contains("\"-novid\""));
        assert_eq!(fx.patcher().current().unwrap(), Some(pair()));
    }

    #[test]
    fn clearing_removes_only_path_flags() {
        let fx = Fixture::new(LOCALCONFIG);
        fx.patcher().patch(Some(&pair()), Some("-Invisible")).unwrap();
        fx.patcher().patch(None, None).unwrap();
        let text = fs::read_to_string(&fx.path).unwrap();
        assert!(text.contains("\"-SkipIntroTutorial %command% -Invisible\""));
        assert_eq!(fx.patcher().current().unwrap(), None);
    }

    #[test]
    fn running_launcher_blocks_patch() {
        let fx = Fixture::new(LOCALCONFIG);
        fx.probe.launch("Steam.exe");
        let err = fx.patcher().patch(Some(&pair()), None).unwrap_err();
        assert!(matches!(err, Error::AppsStillRunning { names } if names == ["steam.exe"]));
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), LOCALCONFIG);
    }

    #[test]
    fn malformed_file_is_left_untouched() {
        let broken = "\"UserLocalConfigStore\"\n{\n\t\"Software\"\n";
        let fx = Fixture::new(broken);
        let err = fx.patcher().patch(Some(&pair()), None).unwrap_err();
        assert!(matches!(err, Error::PatchFailed { .. }));
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), broken);
    }

    #[test]
    fn missing_application_is_reported() {
        let fx = Fixture::new(LOCALCONFIG);
        let config = LauncherConfig {
            app_id: "1".to_string(),
            ..fx.config.clone()
        };
        let patcher = Patcher {
            config: &config,
            ..fx.patcher()
        };
        assert!(matches!(
            patcher.patch(Some(&pair()), None),
            Err(Error::PatchFailed { .. })
        ));
        assert_eq!(fs::read_to_string(&fx.path).unwrap(), LOCALCONFIG);
    }

    #[test]
    fn prefers_account_steam_signed_in_with() {
        let root = tempfile::tempdir().unwrap();
        let locations = Locations::under(root.path());
        let steam = locations.steam.clone().unwrap();
        let active = steam.join("userdata/39734272/config/localconfig.vdf");
        let other = steam.join("userdata/12345/config/localconfig.vdf");
        for path in [&active, &other] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, LOCALCONFIG).unwrap();
        }
        let login_users = r#""users"
{
	"76561197960278073"
	{
		"AccountName"		"shared"
		"MostRecent"		"0"
		"Timestamp"		"1700000500"
	}
	"76561198000000000"
	{
		"AccountName"		"me"
		"MostRecent"		"1"
		"Timestamp"		"1700000000"
	}
}
"#;
        fs::create_dir_all(steam.join("config")).unwrap();
        fs::write(steam.join("config/loginusers.vdf"), login_users).unwrap();
        // touched last, but not the signed-in account
        fs::write(&other, LOCALCONFIG).unwrap();

        assert_eq!(
            LauncherConfig::default().config_path(&locations).unwrap(),
            active
        );
    }

    #[test]
    fn finds_most_recent_user_config() {
        let root = tempfile::tempdir().unwrap();
        let locations = Locations::under(root.path());
        let steam = locations.steam.clone().unwrap();
        let path = steam.join("userdata/12345/config/localconfig.vdf");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, LOCALCONFIG).unwrap();
        fs::create_dir_all(steam.join("userdata/anonymous")).unwrap();
        assert_eq!(
            LauncherConfig::default().config_path(&locations).unwrap(),
            path
        );
    }
}
