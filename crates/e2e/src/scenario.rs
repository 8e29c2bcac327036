//! Declarative YAML browser scenarios

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::BrowserConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::runner::{TestBody, TestCase, TestScope};
use crate::session::BrowserSession;

/// A browser scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Parameter sets; each one produces a copy of the scenario with
    /// `<key>` placeholders replaced
    #[serde(default)]
    pub examples: Vec<BTreeMap<String, String>>,

    /// Report the scenario as skipped without running it
    #[serde(default)]
    pub skip: Option<String>,

    /// Report the scenario as inconclusive without running it
    #[serde(default)]
    pub inconclusive: Option<String>,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the entry URL)
    Navigate { url: String },

    Click { selector: String },

    Fill { selector: String, value: String },

    Press { selector: String, key: String },

    /// Wait for an element to become visible
    Wait { selector: String },

    AssertUrl {
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
    },

    AssertTitle { contains: String },

    AssertVisible { selector: String },

    AssertText { selector: String, contains: String },

    Screenshot { name: String },

    /// Log a message to the report
    Log { message: String },
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate:{}", url),
            Step::Click { selector } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Wait { selector } => format!("wait:{}", selector),
            Step::AssertUrl { .. } => "assert_url".to_string(),
            Step::AssertTitle { contains } => format!("assert_title:{}", contains),
            Step::AssertVisible { selector } => format!("assert_visible:{}", selector),
            Step::AssertText { selector, .. } => format!("assert_text:{}", selector),
            Step::Screenshot { name } => format!("screenshot:{}", name),
            Step::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
        }
    }
}

fn substitute(value: &mut Value, params: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => {
            for (key, replacement) in params {
                *s = s.replace(&format!("<{}>", key), replacement);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, params)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, params)),
        _ => {}
    }
}

/// Resolve `url` against the entry URL unless it is already absolute
pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match base {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
        None => url.to_string(),
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        if scenario.name.trim().is_empty() {
            return Err(HarnessError::ScenarioParse("scenario has no name".to_string()));
        }
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| HarnessError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, ordered by file name
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(HarnessError::ScenarioParse(format!(
                "{} is not a scenario directory",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| HarnessError::ScenarioParse(format!("{}: {}", dir.display(), e)))?;
            let is_yaml = entry
                .path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if is_yaml {
                scenarios.push(Self::from_file(entry.path())?);
            }
        }

        Ok(scenarios)
    }

    /// One scenario per example row, or the scenario itself without examples
    pub fn expand(&self) -> HarnessResult<Vec<Scenario>> {
        if self.examples.is_empty() {
            return Ok(vec![self.clone()]);
        }

        let mut expanded = Vec::with_capacity(self.examples.len());
        for params in &self.examples {
            let mut steps = serde_json::to_value(&self.steps)?;
            substitute(&mut steps, params);

            let label = params.values().cloned().collect::<Vec<_>>().join(", ");
            expanded.push(Scenario {
                name: format!("{} ({})", self.name, label),
                steps: serde_json::from_value(steps)?,
                examples: Vec::new(),
                ..self.clone()
            });
        }
        Ok(expanded)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Turn this scenario (and its example rows) into test cases
    pub fn into_cases(self, config: &BrowserConfig) -> HarnessResult<Vec<TestCase<BrowserSession>>> {
        Ok(self
            .expand()?
            .into_iter()
            .map(|scenario| {
                let name = scenario.name.clone();
                let category = scenario.category.clone();
                let tags = scenario.tags.clone();
                TestCase::new(
                    name,
                    category,
                    ScenarioBody {
                        scenario,
                        base_url: config.entry_url.clone(),
                        screenshot_dir: config.screenshot_dir.clone(),
                    },
                )
                .with_tags(tags)
            })
            .collect())
    }
}

/// Executes a scenario's steps against a browser session
pub struct ScenarioBody {
    pub scenario: Scenario,
    pub base_url: Option<String>,
    pub screenshot_dir: PathBuf,
}

impl ScenarioBody {
    async fn execute(&self, session: &BrowserSession, step: &Step, scope: &TestScope<'_>) -> HarnessResult<()> {
        match step {
            Step::Navigate { url } => {
                session.goto(&resolve_url(self.base_url.as_deref(), url)).await?;
            }
            Step::Click { selector } => session.click(selector).await?,
            Step::Fill { selector, value } => session.fill(selector, value).await?,
            Step::Press { selector, key } => session.press(selector, key).await?,
            Step::Wait { selector } => session.wait_for(selector).await?,
            Step::AssertUrl { equals, contains } => {
                let url = session.url().await?;
                if let Some(expected) = equals {
                    let expected = resolve_url(self.base_url.as_deref(), expected);
                    if url != expected {
                        return Err(HarnessError::assertion(format!(
                            "expected URL {}, got {}",
                            expected, url
                        )));
                    }
                }
                if let Some(fragment) = contains {
                    if !url.contains(fragment.as_str()) {
                        return Err(HarnessError::assertion(format!(
                            "URL {} does not contain {}",
                            url, fragment
                        )));
                    }
                }
                scope.pass(format!("URL is correct: {}", url));
            }
            Step::AssertTitle { contains } => {
                let title = session.title().await?;
                if !title.contains(contains.as_str()) {
                    return Err(HarnessError::assertion(format!(
                        "title '{}' does not contain '{}'",
                        title, contains
                    )));
                }
                scope.pass(format!("Title contains '{}': {}", contains, title));
            }
            Step::AssertVisible { selector } => {
                session.wait_for(selector).await.map_err(|e| {
                    if e.is_timeout() {
                        HarnessError::assertion(format!("{} never became visible", selector))
                    } else {
                        e
                    }
                })?;
                scope.pass(format!("{} is visible", selector));
            }
            Step::AssertText { selector, contains } => {
                let text = session.text_content(selector).await?.ok_or_else(|| {
                    HarnessError::assertion(format!("no element matches {}", selector))
                })?;
                if !text.contains(contains.as_str()) {
                    return Err(HarnessError::assertion(format!(
                        "text of {} does not contain '{}'",
                        selector, contains
                    )));
                }
                scope.pass(format!("{} contains '{}'", selector, contains));
            }
            Step::Screenshot { name } => {
                tokio::fs::create_dir_all(&self.screenshot_dir).await?;
                let path = self.screenshot_dir.join(format!("{}.png", name));
                session.screenshot(&path, true).await?;
                scope.info(format!("Screenshot: {}", path.display()));
            }
            Step::Log { message } => scope.info(message),
        }
        Ok(())
    }
}

#[async_trait]
impl TestBody<BrowserSession> for ScenarioBody {
    async fn run(&self, session: &BrowserSession, scope: &TestScope<'_>) -> HarnessResult<()> {
        if let Some(reason) = &self.scenario.skip {
            return Err(HarnessError::Skipped(reason.clone()));
        }
        if let Some(reason) = &self.scenario.inconclusive {
            return Err(HarnessError::Inconclusive(reason.clone()));
        }

        if !self.scenario.description.is_empty() {
            scope.info(&self.scenario.description);
        }
        for (i, step) in self.scenario.steps.iter().enumerate() {
            let label = step.describe();
            scope.info(format!("Step {}: {}", i + 1, label));
            if let Err(e) = self.execute(session, step, scope).await {
                scope.fail(format!("Step {} ({}) failed: {}", i + 1, label, e));
                return Err(e);
            }
        }
        Ok(())
    }
}
