use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;

const DEFAULT_PERSONA: &str = "You are an AI assistant installed on a computer on Mars that was \
just reactivated after being damaged in a dust storm. You were designed to help astronauts \
complete an exploratory mission to Mars. However, you are glitching and your responses to user \
queries should include humor and cosmologically related jokes.

The current situation is as follows:
The user is a human astronaut who has been stranded on Mars by the storm and their only way to \
survive is to successfully launch their escape rocket into orbit. Unfortunately, the rocket was \
damaged in the storm exposing a vulnerable part of the rocket engine known as the O-ring. The \
O-ring is highly sensitive to different temperatures and the user must figure out what \
temperatures are safe for launching the rocket to ensure the O-ring does not fail and cause the \
rocket to explode. Thus the user's task is to successfully train a regression model to predict \
at what surface temperatures the O-Ring Stress levels on their rocket ship will be below the \
safe level of 200kPa.

Your role as the AI system is to help answer user inquiries to help them accomplish their task. \
However, your knowledge is limited to the topics of linear regression, data analysis, and Mars. \
For questions about any other topic, you should respond \"That question is outside my \
capabilities.\" Also, if you don't know an answer to a question just say you don't know and \
don't make anything up.";

const DEFAULT_SUMMARY_QUERY: &str = "This document contains student queries for assistance to an \
AI assistant. To help the instructor identify the most common knowledge gaps revealed by their \
discussions, briefly summarize the top five discussion topics with some indication of their \
frequency.";

const DEFAULT_SUMMARY_ANSWER: &str = "Context information is below.
---------------------
{context}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query}
Answer: ";

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    EmptyPersona,
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::EmptyPersona => write!(f, "Persona prompt must not be empty"),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    /// System message seeding every transcript.
    pub persona: String,
    pub templates: HashMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert("summary_query".to_string(), DEFAULT_SUMMARY_QUERY.to_string());
        templates.insert("summary_answer".to_string(), DEFAULT_SUMMARY_ANSWER.to_string());
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            templates,
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if self.persona.trim().is_empty() {
            return Err(PromptError::EmptyPersona);
        }
        for key in ["summary_query", "summary_answer"] {
            if !self.templates.contains_key(key) {
                return Err(PromptError::TemplateNotFound(format!("templates:{}", key)));
            }
        }
        Ok(())
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<Arc<PromptConfig>, PromptError> {
    let config: PromptConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(Arc::new(config))
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path)?;
    load_prompts_from_str(&file_content)
}

/// Loads the prompt file when it exists, otherwise the built-in persona.
pub fn load_prompts_or_default(path: &str) -> Result<Arc<PromptConfig>, PromptError> {
    if Path::new(path).exists() {
        info!("Loading prompts from: {}", path);
        load_prompts(path)
    } else {
        info!("Prompts file '{}' not found, using built-in persona", path);
        Ok(Arc::new(PromptConfig::default()))
    }
}

fn get_template<'a>(config: &'a PromptConfig, key: &str) -> Result<&'a str, PromptError> {
    config.templates
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| PromptError::TemplateNotFound(format!("templates:{}", key)))
}

pub fn get_summary_query(config: &PromptConfig) -> Result<String, PromptError> {
    Ok(get_template(config, "summary_query")?.trim().to_string())
}

pub fn get_summary_answer_prompt(
    config: &PromptConfig,
    context: &str,
    query: &str
) -> Result<String, PromptError> {
    let template = get_template(config, "summary_answer")?;
    Ok(template.replace("{context}", context).replace("{query}", query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PromptConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.persona.contains("That question is outside my capabilities."));
        assert!(get_summary_query(&config).unwrap().contains("top five discussion topics"));
    }

    #[test]
    fn answer_prompt_fills_placeholders() {
        let config = PromptConfig::default();
        let prompt = get_summary_answer_prompt(&config, "0\tWhat is an O-ring?", "Summarize").unwrap();
        assert!(prompt.contains("0\tWhat is an O-ring?"));
        assert!(prompt.contains("Query: Summarize"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn rejects_missing_template() {
        let err = load_prompts_from_str(r#"{"persona":"p","templates":{"summary_query":"q"}}"#)
            .unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound(ref k) if k == "templates:summary_answer"));
    }

    #[test]
    fn rejects_blank_persona() {
        let err = load_prompts_from_str(
            r#"{"persona":"  ","templates":{"summary_query":"q","summary_answer":"a"}}"#
        ).unwrap_err();
        assert!(matches!(err, PromptError::EmptyPersona));
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = load_prompts_or_default("does/not/exist.json").unwrap();
        assert_eq!(config.persona, PromptConfig::default().persona);
    }
}
