//! Named skills: playbooks the agent can pull into its system prompt.
//!
//! Only each skill's name and description are listed in the system prompt.
//! The full body is added once the skill is activated by name.

use diskdoc_core::error::Error;

/// One playbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub content: String,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: content.into(),
        }
    }
}

/// An ordered skill catalog. Names are unique; adding a skill with an
/// existing name replaces it in place.
#[derive(Debug, Clone, Default)]
pub struct SkillSet {
    skills: Vec<Skill>,
}

impl SkillSet {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in storage playbooks.
    pub fn defaults() -> Self {
        let mut set = Self::new();
        set.add(Skill::new(
            "storage_diagnosis",
            "Diagnose and fix Kubernetes and cloud storage problems",
            STORAGE_DIAGNOSIS,
        ));
        set.add(Skill::new(
            "file_operations",
            "Read, modify, back up and restore configuration files",
            FILE_OPERATIONS,
        ));
        set.add(Skill::new(
            "log_analysis",
            "Monitor log files, search for patterns and analyse them",
            LOG_ANALYSIS,
        ));
        set
    }

    pub fn add(&mut self, skill: Skill) {
        match self.skills.iter_mut().find(|s| s.name == skill.name) {
            Some(existing) => *existing = skill,
            None => self.skills.push(skill),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The numbered name/description list placed in the system prompt.
    /// Empty when there are no skills.
    pub fn metadata(&self) -> String {
        if self.skills.is_empty() {
            return String::new();
        }
        let mut out = String::from("Available skills:\n");
        for (i, skill) in self.skills.iter().enumerate() {
            out.push_str(&format!("{}. {}: {}\n", i + 1, skill.name, skill.description));
        }
        out.push_str("\nIf a skill is relevant to the task, activate it and follow it.\n");
        out
    }

    /// Full body of the named skill.
    pub fn activate(&self, name: &str) -> Result<&str, Error> {
        self.get(name)
            .map(|s| s.content.as_str())
            .ok_or_else(|| Error::SkillNotFound(name.to_string()))
    }
}

const STORAGE_DIAGNOSIS: &str = "\
# Storage Diagnosis Skill

Expertise for diagnosing and fixing storage problems in Kubernetes and cloud environments.

## Capabilities

### 1. PVC problems
- Check PVC status
- Validate StorageClass settings
- Resolve volume binding failures

### 2. Storage driver problems
- Check CSI driver health
- Analyse driver logs
- Restart and recover drivers

### 3. Disk space problems
- Check disk usage
- Clean up stale resources
- Expand storage

## Procedure

1. Check the state of the related resources (kubectl get)
2. Check events and logs
3. Validate configuration files
4. Search the web for similar incidents
5. Apply the fix

## Cautions

- Always back up before working on production
- Apply changes step by step
- Always have a rollback plan
";

const FILE_OPERATIONS: &str = "\
# File Operations Skill

How to safely modify Kubernetes manifests and configuration files.

## Capabilities

### 1. Reading files
- Parse YAML, JSON and TOML files
- Validate settings
- Analyse structure

### 2. Modifying files
- Take a backup automatically
- Follow a safe edit procedure
- Verify the change

### 3. Rollback
- Restore from backup
- Keep a change history

## Practices

- Always back up before editing
- Apply changes step by step
- Verify after every edit
";

const LOG_ANALYSIS: &str = "\
# Log Analysis Skill

How to analyse log files effectively and locate problems.

## Capabilities

### 1. Live monitoring
- tail -f style monitoring
- Keyword filtering
- Error pattern detection

### 2. Searching
- Regular expression search
- Time range filtering
- Log level filtering

### 3. Analysis
- Statistics
- Error summaries
- Pattern analysis

## Procedure

1. Confirm the log file path
2. Pick an action (tail/search/filter/summarize)
3. Give a pattern where needed
4. Analyse the result and find the problem
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_storage_playbooks() {
        let set = SkillSet::defaults();
        let names: Vec<_> = set.skills().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["storage_diagnosis", "file_operations", "log_analysis"]);
        assert!(set.get("log_analysis").unwrap().content.contains("tail -f"));
    }

    #[test]
    fn metadata_is_a_numbered_list() {
        let metadata = SkillSet::defaults().metadata();
        assert!(metadata.starts_with("Available skills:\n1. storage_diagnosis: "));
        assert!(metadata.contains("\n2. file_operations: "));
        assert!(metadata.contains("\n3. log_analysis: "));
        assert!(!metadata.contains("# Log Analysis Skill"));
    }

    #[test]
    fn empty_set_has_no_metadata() {
        assert!(SkillSet::new().metadata().is_empty());
    }

    #[test]
    fn activate_returns_the_body() {
        let set = SkillSet::defaults();
        let body = set.activate("file_operations").unwrap();
        assert!(body.starts_with("# File Operations Skill"));
    }

    #[test]
    fn unknown_skill_is_an_error() {
        let err = SkillSet::defaults().activate("zfs_tuning").unwrap_err();
        assert!(matches!(err, Error::SkillNotFound(ref name) if name == "zfs_tuning"));
    }

    #[test]
    fn adding_an_existing_name_replaces_it() {
        let mut set = SkillSet::defaults();
        set.add(Skill::new("log_analysis", "journald only", "# Journald"));
        assert_eq!(set.skills().len(), 3);
        assert_eq!(set.skills()[2].description, "journald only");
        assert_eq!(set.activate("log_analysis").unwrap(), "# Journald");
    }
}
