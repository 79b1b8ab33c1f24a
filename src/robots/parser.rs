//! Robots.txt rules
//!
//! Allow/deny matching is delegated to the robotstxt crate. Crawl-delay is
//! not part of that matcher, so user-agent groups are parsed here to find it.

use robotstxt::DefaultMatcher;

#[derive(Debug, Clone, Default, PartialEq)]
struct AgentGroup {
    agents: Vec<String>,
    crawl_delay: Option<f64>,
}

/// Parsed robots.txt for one origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    body: String,
    groups: Vec<AgentGroup>,
}

impl RobotsRules {
    /// Parses raw robots.txt content
    ///
    /// Malformed lines are skipped; content with no recognisable directives
    /// allows everything.
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut current = AgentGroup::default();
        let mut in_agent_lines = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if !in_agent_lines && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_lines = true;
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay.is_finite() && delay >= 0.0 {
                            current.crawl_delay = Some(delay);
                        }
                    }
                }
                _ => in_agent_lines = false,
            }
        }

        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self {
            body: body.to_string(),
            groups,
        }
    }

    /// Rules that allow everything and set no delay
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Checks whether `url` may be fetched by `user_agent`
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, product_token(user_agent), url)
    }

    /// Crawl delay in seconds for `user_agent`
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let token = product_token(user_agent).to_ascii_lowercase();

        let specific = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && token.starts_with(a.as_str())))
            .find_map(|g| g.crawl_delay);

        specific.or_else(|| {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .find_map(|g| g.crawl_delay)
        })
    }
}

/// The product token of a user agent: `spindle/0.1 (+url)` becomes `spindle`
pub fn product_token(user_agent: &str) -> &str {
    let end = user_agent
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(user_agent.len());
    &user_agent[..end]
}
