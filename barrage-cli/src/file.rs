//! Config file schema.
//!
//! The file is parsed into these serde types first and converted into a validated
//! [`LoadTest`] afterwards, so every mistake is reported before a single VU starts.
use barrage::checks::{Check, CheckPredicate};
use barrage_core::{ConfigError, HttpConfig, HumanDuration, RunConfig, Stage, Threshold};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub start_vus: usize,
    pub stages: Vec<StageFile>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdEntries>,
    pub tick: Option<HumanDuration>,
    pub graceful_ramp_down: Option<HumanDuration>,
    pub graceful_stop: Option<HumanDuration>,
    pub progress_interval: Option<HumanDuration>,
    #[serde(default)]
    pub http: HttpFile,
    pub scenario: ScenarioFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageFile {
    pub duration: HumanDuration,
    pub target: usize,
}

/// `metric: "p(99)<50"` or `metric: ["p(99)<50", {threshold: ..., abortOnFail: true}]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntries {
    One(ThresholdEntry),
    Many(Vec<ThresholdEntry>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThresholdEntry {
    Expr(String),
    Long {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(rename = "delayAbortEval")]
        delay_abort_eval: Option<HumanDuration>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFile {
    pub timeout: Option<HumanDuration>,
    pub rps: Option<NonZeroU32>,
    pub expected_statuses: Option<Vec<StatusRange>>,
    pub user_agent: Option<String>,
}

/// `200` or `"200-399"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatusRange {
    Code(u16),
    Range(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub think_time: Option<HumanDuration>,
    #[serde(default = "default_true")]
    pub log_rate_limited: bool,
    #[serde(default)]
    pub checks: Vec<CheckFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckFile {
    pub name: String,
    pub status: Option<Vec<u16>>,
    pub max_duration: Option<HumanDuration>,
    pub header: Option<HeaderCheck>,
    pub body_contains: Option<String>,
}

/// `header: Retry-After` or `header: {name: Retry-After, value: "1"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HeaderCheck {
    Name(String),
    Pair { name: String, value: Option<String> },
}

/// Everything needed to run the file's load test.
#[derive(Debug, Clone)]
pub struct LoadTest {
    pub config: RunConfig,
    pub checks: Vec<Check>,
    pub target: Target,
}

/// The request each VU iteration makes.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub log_rate_limited: bool,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// Read and parse a config file, choosing the format by extension.
pub fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        Some("json") => serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => Err(ConfigError::Parse(format!(
            "unsupported config format `{}`; expected .yaml, .yml or .json",
            path.display()
        ))),
    }
}

impl TryFrom<ConfigFile> for LoadTest {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut config = RunConfig::new(&file.name);
        config.start_vus = file.start_vus;
        config.stages = file
            .stages
            .iter()
            .map(|s| Stage::new(s.duration.into(), s.target))
            .collect();

        for (metric, entries) in &file.thresholds {
            let entries = match entries {
                ThresholdEntries::One(e) => std::slice::from_ref(e),
                ThresholdEntries::Many(e) => e.as_slice(),
            };
            for entry in entries {
                config.thresholds.push(entry.to_threshold(metric)?);
            }
        }

        if let Some(tick) = file.tick {
            config.tick = tick.into();
        }
        if let Some(grace) = file.graceful_ramp_down {
            config.graceful_ramp_down = grace.into();
        }
        if let Some(grace) = file.graceful_stop {
            config.graceful_stop = grace.into();
        }
        if let Some(interval) = file.progress_interval {
            config.progress_interval = interval.into();
        }
        config.think_time = file.scenario.think_time.map(Duration::from);
        config.http = file.http.to_http_config()?;
        config.validate()?;

        let checks = file
            .scenario
            .checks
            .iter()
            .map(CheckFile::to_check)
            .collect::<Result<Vec<_>, _>>()?;

        let url = file.scenario.url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidScenario(format!(
                "url `{url}` must start with http:// or https://"
            )));
        }

        Ok(LoadTest {
            config,
            checks,
            target: Target {
                url,
                headers: file.scenario.headers.into_iter().collect(),
                log_rate_limited: file.scenario.log_rate_limited,
            },
        })
    }
}

impl ThresholdEntry {
    fn to_threshold(&self, metric: &str) -> Result<Threshold, ConfigError> {
        match self {
            ThresholdEntry::Expr(expr) => Threshold::parse(metric, expr),
            ThresholdEntry::Long {
                threshold,
                abort_on_fail,
                delay_abort_eval,
            } => {
                let t = Threshold::parse(metric, threshold)?;
                if *abort_on_fail {
                    Ok(t.abort_on_fail_after(delay_abort_eval.map(Duration::from).unwrap_or_default()))
                } else {
                    Ok(t)
                }
            }
        }
    }
}

impl HttpFile {
    fn to_http_config(&self) -> Result<HttpConfig, ConfigError> {
        let mut http = HttpConfig::default();
        if let Some(timeout) = self.timeout {
            if timeout.0.is_zero() {
                return Err(ConfigError::InvalidScenario(
                    "http timeout must be non-zero".to_string(),
                ));
            }
            http.timeout = timeout.into();
        }
        http.rps = self.rps;
        http.user_agent = self.user_agent.clone();
        if let Some(ranges) = &self.expected_statuses {
            http.expected_statuses = ranges
                .iter()
                .map(StatusRange::to_range)
                .collect::<Result<_, _>>()?;
        }
        Ok(http)
    }
}

impl StatusRange {
    fn to_range(&self) -> Result<RangeInclusive<u16>, ConfigError> {
        let invalid = |s: &str| ConfigError::InvalidScenario(format!("invalid status range `{s}`"));
        match self {
            StatusRange::Code(code) => Ok(*code..=*code),
            StatusRange::Range(s) => {
                let (lo, hi) = s.split_once('-').ok_or_else(|| invalid(s))?;
                let lo: u16 = lo.trim().parse().map_err(|_| invalid(s))?;
                let hi: u16 = hi.trim().parse().map_err(|_| invalid(s))?;
                if lo > hi {
                    return Err(invalid(s));
                }
                Ok(lo..=hi)
            }
        }
    }
}

impl CheckFile {
    fn to_check(&self) -> Result<Check, ConfigError> {
        let mut predicates = vec![];
        if let Some(codes) = &self.status {
            if codes.is_empty() {
                return Err(ConfigError::InvalidCheck(
                    self.name.clone(),
                    "status list is empty".to_string(),
                ));
            }
            predicates.push(CheckPredicate::Status(codes.clone()));
        }
        if let Some(limit) = self.max_duration {
            predicates.push(CheckPredicate::MaxDuration(limit.into()));
        }
        if let Some(header) = &self.header {
            predicates.push(match header {
                HeaderCheck::Name(name) => CheckPredicate::Header(name.clone(), None),
                HeaderCheck::Pair { name, value } => {
                    CheckPredicate::Header(name.clone(), value.clone())
                }
            });
        }
        if let Some(needle) = &self.body_contains {
            predicates.push(CheckPredicate::BodyContains(needle.clone()));
        }

        match predicates.len() {
            1 => Ok(Check::new(&self.name, predicates.remove(0))),
            0 => Err(ConfigError::InvalidCheck(
                self.name.clone(),
                "no predicate given".to_string(),
            )),
            _ => Err(ConfigError::InvalidCheck(
                self.name.clone(),
                "exactly one of status, max_duration, header or body_contains is allowed"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
name: hello
stages:
  - { duration: 10s, target: 500 }
  - { duration: 1m,  target: 1000 }
  - { duration: 10s, target: 0 }
thresholds:
  http_req_duration: ["p(99)<50"]
  http_req_failed: ["rate<0.01"]
scenario:
  url: http://localhost:8081/hello
  checks:
    - { name: "status is 200 or 429", status: [200, 429] }
    - { name: "response time <50ms", max_duration: 50ms }
"#;

    fn parse_yaml(text: &str) -> Result<LoadTest, ConfigError> {
        let file: ConfigFile =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        LoadTest::try_from(file)
    }

    #[test]
    fn loads_hello_config() {
        let test = parse_yaml(HELLO).unwrap();
        assert_eq!(test.config.name, "hello");
        assert_eq!(
            test.config.stages,
            [
                Stage::new(Duration::from_secs(10), 500),
                Stage::new(Duration::from_secs(60), 1000),
                Stage::new(Duration::from_secs(10), 0),
            ]
        );
        assert_eq!(test.config.thresholds.len(), 2);
        assert_eq!(test.checks.len(), 2);
        assert_eq!(test.target.url, "http://localhost:8081/hello");
        assert!(test.target.log_rate_limited);
        assert_eq!(test.config.tick, barrage_core::DEFAULT_TICK);
    }

    #[test]
    fn loads_json_with_options() {
        let text = r#"{
            "name": "json",
            "start_vus": 2,
            "stages": [{"duration": "30s", "target": 10}],
            "thresholds": {
                "http_req_failed": {"threshold": "rate<0.05", "abortOnFail": true, "delayAbortEval": "10s"},
                "http_req_duration": "avg<200ms"
            },
            "tick": "250ms",
            "graceful_stop": 5,
            "http": {"timeout": "2s", "rps": 100, "expected_statuses": [200, "300-399"], "user_agent": "barrage"},
            "scenario": {
                "url": "https://example.com/",
                "headers": {"Accept": "text/plain"},
                "think_time": "100ms",
                "log_rate_limited": false,
                "checks": [
                    {"name": "has retry", "header": "Retry-After"},
                    {"name": "hello", "body_contains": "Hello"}
                ]
            }
        }"#;
        let file: ConfigFile = serde_json::from_str(text).unwrap();
        let test = LoadTest::try_from(file).unwrap();

        assert_eq!(test.config.start_vus, 2);
        assert_eq!(test.config.tick, Duration::from_millis(250));
        assert_eq!(test.config.graceful_stop, Duration::from_secs(5));
        assert_eq!(test.config.think_time, Some(Duration::from_millis(100)));
        assert_eq!(test.config.http.rps, NonZeroU32::new(100));
        assert!(test.config.http.is_expected(200));
        assert!(!test.config.http.is_expected(204));
        assert!(test.config.http.is_expected(302));

        let abort = test
            .config
            .thresholds
            .iter()
            .find(|t| t.metric == "http_req_failed")
            .unwrap();
        assert!(abort.abort_on_fail);
        assert_eq!(abort.delay_abort_eval, Duration::from_secs(10));

        assert_eq!(test.target.headers, [("Accept".to_string(), "text/plain".to_string())]);
        assert!(!test.target.log_rate_limited);
    }

    #[test]
    fn rejects_bad_threshold() {
        let text = HELLO.replace("p(99)<50", "p(101)<50");
        assert!(matches!(
            parse_yaml(&text),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let text = HELLO.replace("http_req_failed", "http_req_fail");
        assert!(matches!(
            parse_yaml(&text),
            Err(ConfigError::UnknownMetric(m)) if m == "http_req_fail"
        ));
    }

    #[test]
    fn rejects_ambiguous_check() {
        let text = HELLO.replace(
            r#"status: [200, 429] }"#,
            r#"status: [200, 429], max_duration: 1s }"#,
        );
        assert!(matches!(
            parse_yaml(&text),
            Err(ConfigError::InvalidCheck(name, _)) if name == "status is 200 or 429"
        ));
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let text = HELLO.replace("{ duration: 10s, target: 500 }", "{ duration: 1e30, target: 500 }");
        assert!(matches!(parse_yaml(&text), Err(ConfigError::Parse(_))));

        let text = HELLO.replace(
            "{ duration: 10s, target: 500 }",
            "{ duration: 18446744073709551615, target: 500 }",
        );
        assert!(matches!(
            parse_yaml(&text),
            Err(ConfigError::DurationOverflow)
        ));
    }

    #[test]
    fn rejects_missing_stages_and_bad_url() {
        let text = r#"
stages: []
scenario: { url: http://localhost/ }
"#;
        assert!(matches!(parse_yaml(text), Err(ConfigError::NoStages)));

        let text = HELLO.replace("http://localhost:8081/hello", "localhost:8081/hello");
        assert!(matches!(
            parse_yaml(&text),
            Err(ConfigError::InvalidScenario(_))
        ));
    }

    #[test]
    fn unknown_fields_are_errors() {
        let text = format!("{HELLO}\nvus: 10\n");
        assert!(matches!(parse_yaml(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_by_extension() {
        let dir = std::env::temp_dir().join(format!("barrage-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let yaml = dir.join("hello.yaml");
        std::fs::write(&yaml, HELLO).unwrap();
        assert_eq!(load(&yaml).unwrap().name, "hello");

        let toml = dir.join("hello.toml");
        std::fs::write(&toml, HELLO).unwrap();
        assert!(matches!(load(&toml), Err(ConfigError::Parse(_))));

        assert!(matches!(
            load(&dir.join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
