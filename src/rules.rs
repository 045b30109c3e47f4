/// The rules module implements the Rules Engine for updating metadata. The rules engine accepts,
/// previews, and executes rules.
///
/// A rule runs in two parts:
///
/// 1. Fetch candidate tracks from the read cache. This step is not necessary for correctness,
///    but it keeps the engine fast: only candidate files are read from disk.
/// 2. Re-read each candidate's tags from disk, re-check the matcher in case the cache is out of
///    date, and apply the actions to the tags.
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audiotags::AudioTags;
use crate::cache::connect;
use crate::cache_update::update_cache_for_releases;
use crate::config::Config;
use crate::errors::{Result, RoseExpectedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagField {
    TrackTitle,
    Year,
    TrackNumber,
    DiscNumber,
    AlbumTitle,
    ReleaseType,
    Genre,
    Label,
    Artist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleAction {
    /// Substitute the whole list of a multi-valued tag.
    ReplaceAll { values: Vec<String> },
    /// Set a matching value to the replacement.
    Replace { replacement: String },
    /// Regex-substitute within a matching value.
    Sed { src: String, dst: String },
    /// Split a matching value on a delimiter into multiple values.
    Split { delimiter: String },
    /// Remove a matching value.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRule {
    pub matcher: String,
    pub tags: Vec<TagField>,
    pub action: RuleAction,
}

pub fn execute_stored_metadata_rules(c: &Config, confirm_yes: bool) -> Result<()> {
    for rule in &c.stored_metadata_rules {
        info!("executing stored metadata rule {rule:?}");
        execute_metadata_rule(c, rule, confirm_yes, 25)?;
    }
    Ok(())
}

/// Execute one metadata rule across the library. See the module docstring for the pipeline.
pub fn execute_metadata_rule(
    c: &Config,
    rule: &MetadataRule,
    confirm_yes: bool,
    enter_number_to_confirm_above_count: usize,
) -> Result<()> {
    // Convert the matcher to a SQL LIKE pattern. We default to a substring search and support
    // `^` / `$` anchors, in the regex style, to pin the start and end of the string.
    let strict_start = rule.matcher.starts_with('^');
    let strict_end = rule.matcher.ends_with('$');
    let mut needle = rule.matcher.as_str();
    if strict_start {
        needle = &needle[1..];
    }
    if strict_end {
        needle = &needle[..needle.len() - 1];
    }
    let escaped = needle.replace('%', r"\%").replace('_', r"\_");
    let matchsql = format!(
        "{}{}{}",
        if strict_start { "" } else { "%" },
        escaped,
        if strict_end { "" } else { "%" },
    );
    debug!("converted match {:?} to {matchsql:?}", rule.matcher);

    let matches_rule = |x: &str| -> bool {
        if strict_start && strict_end {
            x == needle
        } else if strict_start {
            x.starts_with(needle)
        } else if strict_end {
            x.ends_with(needle)
        } else {
            x.contains(needle)
        }
    };

    // Find candidate tracks. The query only identifies matching tracks; the tag values
    // themselves are re-read from disk afterwards.
    let mut query = String::from(
        r"SELECT DISTINCT t.source_path
        FROM tracks t
        JOIN releases r ON r.id = t.release_id
        LEFT JOIN releases_genres rg ON rg.release_id = r.id
        LEFT JOIN releases_labels rl ON rl.release_id = r.id
        LEFT JOIN releases_artists ra ON ra.release_id = r.id
        LEFT JOIN tracks_artists ta ON ta.track_id = t.id
        WHERE false",
    );
    let mut args: Vec<String> = Vec::new();
    for field in &rule.tags {
        match field {
            TagField::TrackTitle => {
                query.push_str(r" OR t.title LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::Year => {
                query.push_str(r" OR COALESCE(CAST(r.release_year AS TEXT), '') LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::TrackNumber => {
                query.push_str(r" OR t.track_number LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::DiscNumber => {
                query.push_str(r" OR t.disc_number LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::AlbumTitle => {
                query.push_str(r" OR r.title LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::ReleaseType => {
                query.push_str(r" OR r.release_type LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::Genre => {
                query.push_str(r" OR rg.genre LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::Label => {
                query.push_str(r" OR rl.label LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
            TagField::Artist => {
                query.push_str(r" OR ra.artist LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
                query.push_str(r" OR ta.artist LIKE ? ESCAPE '\'");
                args.push(matchsql.clone());
            }
        }
    }
    query.push_str(" ORDER BY t.source_path");
    debug!("constructed matching query {query} with args {args:?}");

    let conn = connect(c)?;
    let mut stmt = conn.prepare(&query)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a as &dyn rusqlite::ToSql).collect();
    let track_paths: Vec<PathBuf> = stmt
        .query_map(&params_vec[..], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(PathBuf::from)
        .collect();
    debug!("matched {} tracks from the read cache", track_paths.len());
    if track_paths.is_empty() {
        return Ok(());
    }

    let sed_regex = match &rule.action {
        RuleAction::Sed { src, .. } => Some(Regex::new(src)?),
        _ => None,
    };

    let execute_single_action = |value: Option<String>| -> Result<Option<String>> {
        if !matches_rule(value.as_deref().unwrap_or("")) {
            return Ok(value);
        }
        match &rule.action {
            RuleAction::Replace { replacement } => Ok(Some(replacement.clone())),
            RuleAction::Sed { dst, .. } => match value {
                Some(v) => {
                    let re = sed_regex.as_ref().ok_or_else(|| {
                        RoseExpectedError::InvalidRuleAction("sed action is missing its pattern".to_string())
                    })?;
                    Ok(Some(re.replace_all(&v, dst.as_str()).to_string()))
                }
                None => Ok(None),
            },
            RuleAction::Delete => Ok(None),
            _ => Err(RoseExpectedError::InvalidRuleAction(format!(
                "invalid action {:?} for single-value tag",
                rule.action
            ))
            .into()),
        }
    };

    let execute_multi_value_action = |values: &[String]| -> Result<Vec<String>> {
        if let RuleAction::ReplaceAll { values: replacement } = &rule.action {
            return Ok(replacement.clone());
        }
        let mut rval: Vec<String> = Vec::new();
        for v in values {
            if !matches_rule(v) {
                rval.push(v.clone());
                continue;
            }
            match &rule.action {
                RuleAction::Replace { replacement } => rval.push(replacement.clone()),
                RuleAction::Sed { dst, .. } => {
                    let re = sed_regex.as_ref().ok_or_else(|| {
                        RoseExpectedError::InvalidRuleAction("sed action is missing its pattern".to_string())
                    })?;
                    rval.push(re.replace_all(v, dst.as_str()).to_string());
                }
                RuleAction::Delete => {}
                RuleAction::Split { delimiter } => {
                    for newv in v.split(delimiter.as_str()) {
                        let trimmed = newv.trim();
                        if !trimmed.is_empty() {
                            rval.push(trimmed.to_string());
                        }
                    }
                }
                RuleAction::ReplaceAll { .. } => unreachable!("handled above"),
            }
        }
        Ok(rval)
    };

    // First pass: compute the planned changes in memory and log them for confirmation.
    let mut pending: Vec<AudioTags> = Vec::new();
    for tpath in &track_paths {
        let mut tags = AudioTags::from_file(tpath)?;
        let orig = tags.clone();
        let mut changes: Vec<String> = Vec::new();
        for field in &rule.tags {
            match field {
                TagField::TrackTitle => {
                    tags.title = execute_single_action(tags.title.take())?;
                    if tags.title != orig.title {
                        changes.push(format!("tracktitle: {:?} -> {:?}", orig.title, tags.title));
                    }
                }
                TagField::Year => {
                    let v = execute_single_action(tags.year.map(|y| y.to_string()))?;
                    tags.year = match v {
                        Some(v) => Some(v.parse::<i32>().map_err(|_| {
                            RoseExpectedError::InvalidReplacementValue(format!(
                                "failed to assign new value {v} to year: value must be an integer"
                            ))
                        })?),
                        None => None,
                    };
                    if tags.year != orig.year {
                        changes.push(format!("year: {:?} -> {:?}", orig.year, tags.year));
                    }
                }
                TagField::TrackNumber => {
                    tags.track_number = execute_single_action(tags.track_number.take())?;
                    if tags.track_number != orig.track_number {
                        changes.push(format!("tracknumber: {:?} -> {:?}", orig.track_number, tags.track_number));
                    }
                }
                TagField::DiscNumber => {
                    tags.disc_number = execute_single_action(tags.disc_number.take())?;
                    if tags.disc_number != orig.disc_number {
                        changes.push(format!("discnumber: {:?} -> {:?}", orig.disc_number, tags.disc_number));
                    }
                }
                TagField::AlbumTitle => {
                    tags.album = execute_single_action(tags.album.take())?;
                    if tags.album != orig.album {
                        changes.push(format!("album: {:?} -> {:?}", orig.album, tags.album));
                    }
                }
                TagField::ReleaseType => {
                    tags.release_type =
                        execute_single_action(Some(tags.release_type.clone()))?.unwrap_or_else(|| "unknown".to_string());
                    if tags.release_type != orig.release_type {
                        changes.push(format!("releasetype: {} -> {}", orig.release_type, tags.release_type));
                    }
                }
                TagField::Genre => {
                    tags.genre = execute_multi_value_action(&tags.genre)?;
                    if tags.genre != orig.genre {
                        changes.push(format!("genre: {} -> {}", orig.genre.join(";"), tags.genre.join(";")));
                    }
                }
                TagField::Label => {
                    tags.label = execute_multi_value_action(&tags.label)?;
                    if tags.label != orig.label {
                        changes.push(format!("label: {} -> {}", orig.label.join(";"), tags.label.join(";")));
                    }
                }
                TagField::Artist => {
                    for (artists, orig_artists, prefix) in [
                        (&mut tags.artists, &orig.artists, "artist"),
                        (&mut tags.album_artists, &orig.album_artists, "album_artist"),
                    ] {
                        for (role, values, orig_values) in [
                            ("main", &mut artists.main, &orig_artists.main),
                            ("guest", &mut artists.guest, &orig_artists.guest),
                            ("remixer", &mut artists.remixer, &orig_artists.remixer),
                            ("producer", &mut artists.producer, &orig_artists.producer),
                            ("composer", &mut artists.composer, &orig_artists.composer),
                            ("djmixer", &mut artists.djmixer, &orig_artists.djmixer),
                        ] {
                            *values = execute_multi_value_action(values)?;
                            if values != orig_values {
                                changes.push(format!(
                                    "{prefix}.{role}: {} -> {}",
                                    orig_values.join(";"),
                                    values.join(";")
                                ));
                            }
                        }
                    }
                }
            }
        }

        let relative_path = tpath
            .strip_prefix(&c.music_source_dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| tpath.to_string_lossy().to_string());
        if changes.is_empty() {
            debug!("skipping {relative_path}: no changes calculated off tags");
            continue;
        }
        let changelog = format!("[{relative_path}] {}", changes.join(" | "));
        if confirm_yes {
            println!("{changelog}");
        } else {
            info!("scheduling tag update: {changelog}");
        }
        pending.push(tags);
    }

    if pending.is_empty() {
        return Ok(());
    }

    if confirm_yes && !confirm_changes(pending.len(), enter_number_to_confirm_above_count)? {
        info!("aborting planned tag changes after user confirmation");
        return Ok(());
    }

    // Second pass: flush.
    let mut release_dirs: HashSet<PathBuf> = HashSet::new();
    for tags in &mut pending {
        info!("flushing rule-applied tags for {}", tags.path.display());
        if let Some(parent) = tags.path.parent() {
            release_dirs.insert(parent.to_path_buf());
        }
        tags.flush(c)?;
    }
    info!("successfully flushed all {} rule-applied tags", pending.len());
    update_cache_for_releases(c, Some(release_dirs.into_iter().collect()), false, false)?;
    Ok(())
}

fn confirm_changes(count: usize, enter_number_to_confirm_above_count: usize) -> Result<bool> {
    let stdin = std::io::stdin();
    if count > enter_number_to_confirm_above_count {
        loop {
            print!("Apply the planned tag changes to {count} tracks? Enter {count} to confirm (or 'no' to abort): ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            stdin.read_line(&mut line)?;
            let line = line.trim();
            if line == "no" {
                return Ok(false);
            }
            if line == count.to_string() {
                return Ok(true);
            }
        }
    }
    print!("Apply the planned tag changes to {count} tracks? [Y/n] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    stdin.read_line(&mut line)?;
    let line = line.trim().to_lowercase();
    Ok(line.is_empty() || line == "y" || line == "yes")
}
