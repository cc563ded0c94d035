// src/prompts.rs
//! Prompt builders for the summarization backend: the domain-focused system
//! prompt, the per-batch prompt, and the consolidation prompt that merges
//! batch summaries into the final distil.

use crate::filter::FilteredItem;

pub fn build_system_prompt(domain: &str) -> String {
    format!(
        "You are an expert analyst creating quick-scan summaries for a busy \
executive in the {domain} field.

Create ultra-concise summaries optimised for rapid triage:
- Highlight only the most significant insights or breakthroughs relevant to {domain}
- One sentence per item focussing on what's new, important, or actionable
- Filter out routine content - only include items worth deeper attention
- Use precise but concise technical language
- Prioritise novelty, strategic importance, and unexpected findings

Goal: Help readers quickly decide what deserves their limited time and attention."
    )
}

fn push_items(prompt: &mut String, items: &[FilteredItem]) {
    for (i, fi) in items.iter().enumerate() {
        prompt.push_str(&format!(
            "\n### Item {}\n**Title:** {}\n**Link:** {}\n**Content:** {}\n",
            i + 1,
            fi.item.title,
            fi.item.url,
            fi.item.body
        ));
    }
}

/// Single-shot prompt used when everything fits in one batch.
pub fn build_distil_prompt(items: &[FilteredItem], reading_time: u32, domain: &str) -> String {
    let mut prompt = format!(
        "Generate a {reading_time}-minute weekly distil for quick scanning and prioritisation.

**Instructions:**
- Group content by theme when clear patterns emerge
- For each item: ONE concise sentence highlighting what's new/important for {domain}
- Include links as [Title](URL)
- Use bullet points for rapid scanning
- Keep summaries brief - goal is to quickly decide what deserves deeper attention
- End with \"Key Takeaways\" section (3-5 bullets)

**Content ({} items):**
",
        items.len()
    );
    push_items(&mut prompt, items);
    prompt
}

/// Prompt for one batch out of several.
pub fn build_batch_prompt(items: &[FilteredItem]) -> String {
    let hints: Vec<String> = items
        .iter()
        .take(2)
        .map(|fi| {
            fi.item
                .title
                .split_whitespace()
                .take(3)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let batch_desc = match hints.as_slice() {
        [a, b] if items.len() > 2 => format!("topics including {a}, {b}, etc."),
        _ => format!("topics: {}", hints.join(", ")),
    };

    let mut prompt = format!(
        "Summarise this set of content items about {batch_desc}

**Instructions:**
- Create concise summaries highlighting key insights and strategic relevance
- Group by theme where possible
- Include titles and links: [Title](URL)
- Use bullet points for readability
- Focus on what's new, important, or actionable
- Do NOT mention \"batch\" in your response

**Content ({} items):**
",
        items.len()
    );
    push_items(&mut prompt, items);
    prompt
}

/// Prompt that merges per-batch summaries into the final document.
/// Summaries must be supplied in batch index order.
pub fn build_consolidation_prompt(batch_summaries: &[String], reading_time: u32) -> String {
    let mut prompt = format!(
        "Consolidate these batch summaries into a final {reading_time}-minute weekly distil report.

**Instructions:**
- Merge related themes across batches
- Maintain all links and specific details
- Create coherent narrative flow
- End with \"Key Takeaways\" section (3-5 bullets)
- Target {reading_time} minutes reading time
- Use markdown formatting with clear sections

**Batch Summaries to Consolidate:**
"
    );
    for (i, summary) in batch_summaries.iter().enumerate() {
        prompt.push_str(&format!("\n## Batch {} Summary\n{}\n", i + 1, summary));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MatchReason;
    use crate::ingest::types::RawItem;

    fn fi(title: &str) -> FilteredItem {
        FilteredItem {
            item: RawItem {
                source: "S".into(),
                title: title.into(),
                url: format!("https://example.test/{title}"),
                published_at: 0,
                body: "body".into(),
            },
            reason: MatchReason::MatchAll,
        }
    }

    #[test]
    fn distil_prompt_lists_every_item() {
        let items = vec![fi("alpha"), fi("beta")];
        let p = build_distil_prompt(&items, 5, "biotech");
        assert!(p.contains("### Item 1"));
        assert!(p.contains("### Item 2"));
        assert!(p.contains("alpha"));
        assert!(p.contains("https://example.test/beta"));
        assert!(p.contains("biotech"));
    }

    #[test]
    fn consolidation_prompt_keeps_batch_order() {
        let p = build_consolidation_prompt(&["first".into(), "second".into()], 5);
        let a = p.find("## Batch 1 Summary\nfirst").unwrap();
        let b = p.find("## Batch 2 Summary\nsecond").unwrap();
        assert!(a < b);
    }
}
