use std::collections::HashSet;

use regex::Regex;

use super::parsers::placeholder_name;

struct Region {
    sentinel: String,
    original: String,
    /// Byte offset of the sentinel in the working text.
    at: usize,
}

/// SQL with excluded regions swapped for sentinel tokens.
pub(super) struct Masked {
    text: String,
    /// Insertion order, which is also ascending `at`.
    regions: Vec<Region>,
}

/// Hands out `$N` tokens that do not occur anywhere in the source SQL.
struct Sentinels {
    /// Every digit prefix that follows a `$` in the source, so `$12` rules out
    /// both `$1` and `$12`.
    taken: HashSet<String>,
    counter: usize,
}

impl Sentinels {
    fn scan(sql: &str) -> Self {
        let mut taken = HashSet::new();
        let bytes = sql.as_bytes();
        for (dollar, _) in sql.match_indices('$') {
            let digits = bytes[dollar + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            for end in 1..=digits {
                taken.insert(sql[dollar + 1..dollar + 1 + end].to_owned());
            }
        }
        Self { taken, counter: 0 }
    }

    fn next(&mut self) -> String {
        loop {
            let digits = self.counter.to_string();
            self.counter += 1;
            if !self.taken.contains(&digits) {
                return format!("${digits}");
            }
        }
    }
}

pub(super) fn mask_regions(sql: &str, exclusions: Option<&Regex>) -> Masked {
    let mut sentinels = Sentinels::scan(sql);
    let mut regions = Vec::new();
    let mut text = String::with_capacity(sql.len());
    let mut last = 0;
    for found in exclusions.into_iter().flat_map(|re| re.find_iter(sql)) {
        if found.as_str().is_empty() {
            continue;
        }
        let sentinel = sentinels.next();
        text.push_str(&sql[last..found.start()]);
        regions.push(Region {
            at: text.len(),
            sentinel: sentinel.clone(),
            original: found.as_str().to_owned(),
        });
        text.push_str(&sentinel);
        last = found.end();
    }
    text.push_str(&sql[last..]);
    Masked { text, regions }
}

impl Masked {
    fn overlaps_region(&self, start: usize, end: usize) -> bool {
        let first = self
            .regions
            .partition_point(|r| r.at + r.sentinel.len() <= start);
        self.regions.get(first).is_some_and(|r| r.at < end)
    }

    /// Replace every placeholder outside the masked regions with `?`, right-padded
    /// with spaces to the placeholder's character length. Returns the bare names in
    /// left-to-right order.
    pub(super) fn replace_placeholders(&mut self, placeholder: &Regex) -> Vec<String> {
        let mut names = Vec::new();
        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;
        let mut shifts: Vec<(usize, usize, usize)> = Vec::new();

        for caps in placeholder.captures_iter(&self.text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.as_str().is_empty() || self.overlaps_region(whole.start(), whole.end()) {
                continue;
            }
            let width = whole.as_str().chars().count();
            let replacement = format!("{:<width$}", "?");
            out.push_str(&self.text[last..whole.start()]);
            out.push_str(&replacement);
            shifts.push((whole.end(), whole.len(), replacement.len()));
            names.push(placeholder_name(&caps));
            last = whole.end();
        }
        if names.is_empty() {
            return names;
        }
        out.push_str(&self.text[last..]);

        // Both lists are in ascending offset order.
        let mut applied = shifts.iter().peekable();
        let mut delta = 0isize;
        for region in &mut self.regions {
            while let Some(&&(end, old_len, new_len)) = applied.peek() {
                if end > region.at {
                    break;
                }
                delta += new_len as isize - old_len as isize;
                applied.next();
            }
            region.at = region.at.saturating_add_signed(delta);
        }
        self.text = out;
        names
    }

    /// Current working text, sentinels included.
    pub(super) fn text(&self) -> &str {
        &self.text
    }

    /// Put excluded regions back, newest sentinel first.
    pub(super) fn restore(self) -> String {
        let mut text = self.text;
        for region in self.regions.iter().rev() {
            let end = region.at + region.sentinel.len();
            if text.get(region.at..end) == Some(region.sentinel.as_str()) {
                text.replace_range(region.at..end, &region.original);
            }
        }
        text
    }
}
