use crate::adapter::{
    AuroraVisionAdapter, EstimationCurve, FusionSolarAdapter, NorthboundAdapter, PlantAdapter,
};
use crate::api::{self, aurora, Error};
use crate::clock::Clock;
use crate::manager::PlantManager;
use crate::model::{AuroraApi, PortalAccount};
use crate::plant::{Plant, ProviderType};
use crate::session::{AuroraSessionManager, FileSessionCache, FusionClientManager, NorthboundManager};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE: &str = "config/monitor";
const ENV_PREFIX: &str = "PV";
const DEFAULT_INTERVAL: u64 = 300;
const DEFAULT_SUBDOMAIN: &str = "uni005eu5";
const NORTHBOUND_API_URL: &str = "https://eu5.fusionsolar.huawei.com/thirdData";
const FUSION_KEY: &str = "fusion_main";

fn default_interval() -> u64 {
    DEFAULT_INTERVAL
}

fn default_plant_name() -> String {
    String::from("FusionSolar")
}

fn default_session_cache() -> PathBuf {
    PathBuf::from("fusion_session.json")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(i64),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringList {
    List(Vec<Scalar>),
    Separated(Scalar),
}

/// A list, or a single comma separated value as environment variables deliver it.
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match StringList::deserialize(deserializer)? {
        StringList::List(items) => items.into_iter().map(String::from).collect(),
        StringList::Separated(value) => String::from(value)
            .split(',')
            .map(str::to_owned)
            .collect::<Vec<_>>(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuroraSettings {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, deserialize_with = "string_list")]
    pub entity_ids: Vec<String>,
    /* positional, a missing alias falls back to a generated name */
    #[serde(default, deserialize_with = "string_list")]
    pub entity_aliases: Vec<String>,
    pub interval: Option<u64>,
    pub login_url: Option<String>,
    pub data_url: Option<String>,
    pub timezone: Option<String>,
}

impl AuroraSettings {
    fn api(&self) -> AuroraApi {
        let defaults = aurora::api(self.username.to_owned(), self.password.to_owned());
        AuroraApi {
            login_url: self.login_url.to_owned().unwrap_or(defaults.login_url),
            data_url: self.data_url.to_owned().unwrap_or(defaults.data_url),
            timezone: self.timezone.to_owned().unwrap_or(defaults.timezone),
            ..defaults
        }
    }

    fn plant_name(&self, position: usize, entity_id: &str) -> String {
        self.entity_aliases
            .get(position)
            .map(String::to_owned)
            .unwrap_or_else(|| format!("AuroraVision-{}", entity_id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NorthboundSettings {
    #[serde(default)]
    pub enabled: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_plant_id")]
    pub plant_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_plant_id() -> String {
    String::from(crate::adapter::northbound::FIRST_AVAILABLE_PLANT)
}

fn default_api_url() -> String {
    String::from(NORTHBOUND_API_URL)
}

impl Default for NorthboundSettings {
    fn default() -> Self {
        NorthboundSettings {
            enabled: false,
            username: None,
            password: None,
            plant_id: default_plant_id(),
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionSettings {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub subdomain: Option<String>,
    #[serde(default = "default_plant_name")]
    pub plant_name: String,
    pub interval: Option<u64>,
    #[serde(default = "default_session_cache")]
    pub session_cache: PathBuf,
    pub base_url: Option<String>,
    #[serde(default)]
    pub northbound: NorthboundSettings,
}

impl FusionSettings {
    fn account(&self) -> PortalAccount {
        let base_url = self.base_url.to_owned().unwrap_or_else(|| {
            let subdomain = self
                .subdomain
                .as_deref()
                .filter(|subdomain| !subdomain.is_empty())
                .unwrap_or(DEFAULT_SUBDOMAIN);
            format!("https://{}.fusionsolar.huawei.com", subdomain)
        });

        PortalAccount {
            base_url,
            username: self.username.to_owned(),
            password: self.password.to_owned(),
        }
    }

    /// Northbound credentials fall back to the portal ones.
    fn northbound_api(&self) -> crate::model::Api {
        let northbound = &self.northbound;
        api::api(
            northbound.api_url.to_owned(),
            northbound
                .username
                .to_owned()
                .unwrap_or_else(|| self.username.to_owned()),
            northbound
                .password
                .to_owned()
                .unwrap_or_else(|| self.password.to_owned()),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_interval")]
    pub interval: u64,
    pub aurora: Option<AuroraSettings>,
    pub fusion: Option<FusionSettings>,
    #[serde(default)]
    pub estimation: EstimationCurve,
}

impl Settings {
    /// Shortest interval among configured providers, the global one without providers.
    pub fn effective_interval(&self) -> Duration {
        let providers = [
            self.aurora.as_ref().map(|aurora| aurora.interval),
            self.fusion.as_ref().map(|fusion| fusion.interval),
        ];
        let seconds = providers
            .iter()
            .flatten()
            .map(|interval| interval.unwrap_or(self.interval))
            .min()
            .unwrap_or(self.interval);

        Duration::from_secs(seconds.max(1))
    }
}

/// Read the optional settings file at `path` (extension picks the format), overridden by
/// `PV_`-prefixed environment variables such as `PV_AURORA__PASSWORD`.
pub fn read_settings(path: &str) -> Result<Settings, Error> {
    Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .and_then(Config::try_deserialize)
        .map_err(|e| Error::Config(e.to_string()))
}

/// Register every configured plant with the session manager and adapter of its provider.
pub fn build_manager(settings: &Settings, clock: Arc<dyn Clock>) -> PlantManager {
    let mut builder = PlantManager::builder()
        .clock(clock.clone())
        .interval(settings.effective_interval());

    if let Some(aurora) = &settings.aurora {
        let sessions = Arc::new(AuroraSessionManager::new(aurora.api()));
        let adapter: Arc<dyn PlantAdapter> =
            Arc::new(AuroraVisionAdapter::new(sessions, clock.clone()));

        for (position, entity_id) in aurora.entity_ids.iter().enumerate() {
            let plant = Plant::new(
                aurora.plant_name(position, entity_id),
                entity_id.to_owned(),
                ProviderType::AuroraVision,
            );
            builder = builder.plant(format!("aurora_{}", entity_id), plant, adapter.clone());
        }
    }

    if let Some(fusion) = &settings.fusion {
        if fusion.northbound.enabled {
            log::info!("using the northbound API for FusionSolar");
            let sessions = Arc::new(NorthboundManager::new(fusion.northbound_api()));
            let adapter = NorthboundAdapter::new(
                sessions.clone(),
                settings.estimation.clone(),
                clock.clone(),
            );
            let plant = Plant::new(
                fusion.plant_name.to_owned(),
                fusion.northbound.plant_id.to_owned(),
                ProviderType::FusionSolarNorthbound,
            );
            builder = builder
                .plant(FUSION_KEY, plant, Arc::new(adapter))
                .close_on_stop(sessions);
        } else {
            log::info!("using the web portal API for FusionSolar");
            let clients = Arc::new(FusionClientManager::new(
                fusion.account(),
                Box::new(FileSessionCache::new(&fusion.session_cache)),
            ));
            let plant = Plant::new(
                fusion.plant_name.to_owned(),
                "main",
                ProviderType::FusionSolarStandard,
            );
            builder = builder
                .plant(FUSION_KEY, plant, Arc::new(FusionSolarAdapter::new(clients.clone())))
                .keep_alive(clients);
        }
    }

    builder.build()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::SystemClock;
    use std::fs;

    fn settings(toml: &str) -> Settings {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("monitor.toml");
        fs::write(&file, toml).unwrap();
        read_settings(file.to_str().unwrap()).unwrap()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings(dir.path().join("absent").to_str().unwrap()).unwrap();

        assert_eq!(300, settings.interval);
        assert!(settings.aurora.is_none());
        assert!(settings.fusion.is_none());
        assert_eq!(EstimationCurve::default(), settings.estimation);
        assert_eq!(Duration::from_secs(300), settings.effective_interval());
    }

    #[test]
    fn full_file() {
        let settings = settings(
            r#"
            interval = 600

            [aurora]
            username = "user"
            password = "secret"
            entity_ids = [14354021, 14354022]
            entity_aliases = ["Pizzuti"]
            interval = 120

            [fusion]
            username = "portal"
            password = "portal-secret"
            subdomain = "region01eu5"

            [fusion.northbound]
            enabled = true
            password = "system-code"

            [estimation]
            peak_hour = 12
            "#,
        );

        let aurora = settings.aurora.as_ref().unwrap();
        assert_eq!(vec!["14354021", "14354022"], aurora.entity_ids);
        assert_eq!("Pizzuti", aurora.plant_name(0, "14354021"));
        assert_eq!("AuroraVision-14354022", aurora.plant_name(1, "14354022"));
        assert_eq!(endpoint_default(), aurora.api().data_url);

        let fusion = settings.fusion.as_ref().unwrap();
        assert_eq!("https://region01eu5.fusionsolar.huawei.com", fusion.account().base_url);
        let northbound = fusion.northbound_api();
        assert_eq!("portal", northbound.username);
        assert_eq!("system-code", northbound.password);
        assert_eq!(NORTHBOUND_API_URL, northbound.api_url);
        assert_eq!("main", fusion.northbound.plant_id);

        assert_eq!(12, settings.estimation.peak_hour);
        assert_eq!(5.0, settings.estimation.half_width);
        /* fusion inherits the global 600, aurora asks for 120 */
        assert_eq!(Duration::from_secs(120), settings.effective_interval());
    }

    fn endpoint_default() -> String {
        String::from(api::endpoint::AURORA_PLANT_ENERGY_URL)
    }

    #[test]
    fn comma_separated_entity_ids() {
        let settings = settings(
            r#"
            [aurora]
            entity_ids = "1, 2,,3"
            "#,
        );
        assert_eq!(vec!["1", "2", "3"], settings.aurora.unwrap().entity_ids);
    }

    #[test]
    fn registers_plant_keys() {
        let settings = settings(
            r#"
            [aurora]
            entity_ids = ["1", "2"]
            entity_aliases = ["North roof"]

            [fusion]
            plant_name = "Giumentare"
            interval = 900
            "#,
        );

        let manager = build_manager(&settings, Arc::new(SystemClock));
        let plants = manager.plants();
        assert_eq!(
            vec!["aurora_1", "aurora_2", "fusion_main"],
            plants.keys().collect::<Vec<_>>()
        );
        assert_eq!("North roof", plants["aurora_1"].name);
        assert_eq!("AuroraVision-2", plants["aurora_2"].name);
        assert_eq!("FusionSolar", plants["fusion_main"].provider);
        assert_eq!("Giumentare", plants["fusion_main"].name);
        assert_eq!(Duration::from_secs(300), manager.interval());
    }
}
