//! Renders the chat page.

use flasq_core::{ChatMessage, ChatRole, ChatSession, Config, ModelChoices, ERROR_NOTICE};
use minijinja::Environment;
use serde::Serialize;

const INDEX_TEMPLATE: &str = "index.html";

/// How many model names the sidebar lists before summarizing the rest.
const LISTED_MODELS: usize = 5;

#[derive(Serialize)]
struct MessageView<'a> {
    role: &'static str,
    content: &'a str,
    is_error: bool,
}

impl<'a> From<&'a ChatMessage> for MessageView<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
            is_error: message.role == ChatRole::Assistant && message.content == ERROR_NOTICE,
        }
    }
}

/// Everything the page template needs for one render.
#[derive(Serialize)]
pub struct PageView<'a> {
    page_title: &'a str,
    app_name: &'a str,
    welcome: String,
    server_name: &'static str,
    base_url: &'a str,
    default_model: &'a str,
    models: &'a [String],
    selected_model: &'a str,
    listed_models: &'a [String],
    more_models: usize,
    connected: bool,
    none_installed: bool,
    system_prompt: &'a str,
    temperature: f32,
    awaiting: bool,
    notice: Option<&'a str>,
    messages: Vec<MessageView<'a>>,
}

impl<'a> PageView<'a> {
    pub fn new(
        config: &'a Config,
        server_name: &'static str,
        choices: &'a ModelChoices,
        session: &'a ChatSession,
        notice: Option<&'a str>,
    ) -> Self {
        let app_name = config.app_name.as_str();
        let listed = choices.models.len().min(LISTED_MODELS);
        let settings = session.settings();

        Self {
            page_title: config.page_title.as_str(),
            app_name,
            welcome: format!(
                "Hello! I'm {app_name}, your professional AI assistant powered by {server_name}. \
                 I'm here to help with coding, programming, and any questions you have!"
            ),
            server_name,
            base_url: config.ollama_base_url.as_str(),
            default_model: config.default_model.as_str(),
            models: &choices.models,
            selected_model: choices.selected_model(),
            listed_models: &choices.models[..listed],
            more_models: choices.models.len() - listed,
            connected: choices.reachable,
            none_installed: choices.none_installed,
            system_prompt: &settings.system_prompt,
            temperature: settings.temperature,
            awaiting: session.is_awaiting(),
            notice,
            messages: session.messages().iter().map(MessageView::from).collect(),
        }
    }
}

pub struct PageRenderer {
    env: Environment<'static>,
}

impl PageRenderer {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(INDEX_TEMPLATE, include_str!("../templates/index.html"))?;
        Ok(Self { env })
    }

    pub fn render(&self, view: &PageView<'_>) -> Result<String, minijinja::Error> {
        self.env.get_template(INDEX_TEMPLATE)?.render(view)
    }
}
