//! Route templates and their major parameters

use std::fmt;

/// Leading path segments whose first parameter partitions rate limits
const MAJOR_RESOURCES: [&str; 3] = ["channels", "guilds", "webhooks"];

/// A concrete request path together with the template it was built from.
///
/// Templates use `{}` placeholders that are filled in order:
/// `Route::new("/channels/{}/messages/{}", &[&channel_id, &message_id])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    template: String,
    path: String,
    major: Option<String>,
}

impl Route {
    #[must_use]
    pub fn new(template: impl Into<String>, params: &[&dyn fmt::Display]) -> Self {
        let template = template.into();
        let mut path = String::with_capacity(template.len() + params.len() * 20);
        let mut params_iter = params.iter();
        let mut rest = template.as_str();

        while let Some(at) = rest.find("{}") {
            path.push_str(&rest[..at]);
            match params_iter.next() {
                Some(param) => path.push_str(&param.to_string()),
                None => path.push_str("{}"),
            }
            rest = &rest[at + 2..];
        }
        path.push_str(rest);

        let major = major_parameter(&template, params);

        Self {
            template,
            path,
            major,
        }
    }

    /// Route with no parameters
    #[must_use]
    pub fn fixed(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            template: path.clone(),
            path,
            major: None,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First parameter when the template is rooted at a channel, guild, or webhook
    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }
}

fn major_parameter(template: &str, params: &[&dyn fmt::Display]) -> Option<String> {
    let mut segments = template.trim_start_matches('/').split('/');
    let resource = segments.next()?;
    let first_param = segments.next()?;
    if first_param == "{}" && MAJOR_RESOURCES.contains(&resource) {
        params.first().map(ToString::to_string)
    } else {
        None
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
