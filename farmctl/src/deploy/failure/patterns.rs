//! Built-in failure patterns

use regex::Regex;

use super::{tail, FailureContext, FailurePattern};

/// Lines of a message shown when no pattern explains it
const UNCATEGORIZED_TAIL: usize = 20;

/// The working copy on the server has local edits that block the merge
#[derive(Debug)]
pub struct GitMergeError {
    pattern: Regex,
}

impl GitMergeError {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(
                r"Your local changes to the following files would be overwritten by merge",
            )?,
        })
    }
}

impl FailurePattern for GitMergeError {
    fn name(&self) -> &str {
        "Git repository on server out of date"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn description(&self, context: &FailureContext) -> String {
        let task = context.task_id.as_deref().unwrap_or("(unknown)");
        format!(
            "The checkout on {server} has local modifications, so the new revision cannot be merged.\n\
             Either reset it and redeploy:\n\
             \n  $ farmctl ssh {server} -f {farm}\n  # cd /var/www && git reset HEAD --hard\n\
             \nor re-deploy task {task} from the deployment tasks page once it shows 'failed'.",
            server = context.server_name,
            farm = context.farm_id,
            task = task,
        )
    }
}

/// The deploy key used to fetch sources is missing on the server
#[derive(Debug)]
pub struct GitKeyError {
    pattern: Regex,
}

impl GitKeyError {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"/root/\.ssh/.+id: No such file or directory")?,
        })
    }
}

impl FailurePattern for GitKeyError {
    fn name(&self) -> &str {
        "No keys for git"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn description(&self, _context: &FailureContext) -> String {
        "The farm does not have the ssh deploy key needed to check out the code.\n\
         Run the deploy-keys script on the farm and retry."
            .to_string()
    }

    fn lines_before(&self) -> usize {
        1
    }
}

/// Checkout of the application or one of its git dependencies failed
#[derive(Debug)]
pub struct GitError {
    pattern: Regex,
}

impl GitError {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"Git error")?,
        })
    }
}

impl FailurePattern for GitError {
    fn name(&self) -> &str {
        "Problem with git"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn description(&self, _context: &FailureContext) -> String {
        "Checking out the application source, or one of the git-referenced\n\
         dependencies it bundles, failed on the server."
            .to_string()
    }

    fn lines_before(&self) -> usize {
        1
    }
}

/// Cloud storage refused the access key while uploading static assets
#[derive(Debug)]
pub struct StorageAuthentication {
    pattern: Regex,
    variables: Vec<String>,
}

impl StorageAuthentication {
    pub fn new(variables: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"AWS Access Key Id you provided does not exist in our records")?,
            variables,
        })
    }
}

impl FailurePattern for StorageAuthentication {
    fn name(&self) -> &str {
        "Storage authentication failed during asset upload"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn description(&self, context: &FailureContext) -> String {
        let mut text = String::from(
            "Static assets are copied to cloud storage during the deployment and the\n\
             storage service rejected the configured credentials. Check these farm variables:",
        );
        for name in &self.variables {
            let value = context
                .variables
                .get(name)
                .map(String::as_str)
                .unwrap_or("(not set)");
            text.push_str(&format!("\n  {:<25}: {}", name, value));
        }
        text
    }
}

/// Catch-all for failures no other pattern recognizes
#[derive(Debug)]
pub struct Uncategorized {
    pattern: Regex,
}

impl Uncategorized {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r".+")?,
        })
    }
}

impl FailurePattern for Uncategorized {
    fn name(&self) -> &str {
        "Uncategorized failure"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn description(&self, _context: &FailureContext) -> String {
        "(see log message)".to_string()
    }

    fn matches(&self, _entry: &fleet_models::LogEntry) -> bool {
        true
    }

    fn excerpt(&self, message: &str) -> String {
        tail(message, UNCATEGORIZED_TAIL)
    }
}
