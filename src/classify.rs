use std::collections::{BTreeMap, BTreeSet};

use crate::model::MergedRecord;

/// Tag applied by callers that want every record to carry at least one tag.
pub const GENERIC_TAG: &str = "Japanese";

/// Category tag → keywords, matched case-insensitively as substrings.
/// Japanese spellings first, romanized/English after.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Sushi", &["寿司", "すし", "スシ", "鮨", "sushi"]),
    ("Ramen", &["ラーメン", "らーめん", "つけ麺", "ramen"]),
    ("Tempura", &["天ぷら", "てんぷら", "tempura"]),
    ("Yakitori", &["焼き鳥", "やきとり", "鳥料理", "yakitori"]),
    ("Yakiniku", &["焼肉", "やきにく", "ホルモン", "yakiniku"]),
    ("Tonkatsu", &["とんかつ", "トンカツ", "豚かつ", "カツ", "tonkatsu"]),
    ("Unagi", &["うなぎ", "ウナギ", "鰻", "unagi"]),
    ("Japanese", &["日本料理", "和食", "懐石", "割烹", "japanese", "kaiseki"]),
    ("Soba", &["そば", "ソバ", "蕎麦", "soba"]),
    ("Udon", &["うどん", "ウドン", "udon"]),
    ("Curry", &["カレー", "カリー", "curry"]),
    ("Izakaya", &["居酒屋", "izakaya"]),
    ("Cafe", &["カフェ", "喫茶", "cafe", "coffee"]),
    ("Tea House", &["茶屋", "茶房", "甘味処", "tea house"]),
    ("Bakery", &["パン", "ブーランジェリー", "ベーカリー", "bakery"]),
    (
        "Desserts",
        &["ケーキ", "和菓子", "スイーツ", "パティスリー", "たい焼き", "dessert", "sweets"],
    ),
    (
        "Pizza",
        &["ピザ", "ピッツェリア", "pizza", "pizzeria", "trattoria", "italian"],
    ),
    ("French", &["フレンチ", "ビストロ", "french", "bistro"]),
    ("Chinese", &["中華", "中国料理", "chinese"]),
    ("Steak", &["ステーキ", "鉄板焼", "steak", "teppanyaki"]),
];

/// Places API `types` values that imply a tag. Generic types such as
/// `restaurant` or `food` carry no cuisine information and are absent here.
pub const TYPE_CATEGORIES: &[(&str, &str)] = &[
    ("cafe", "Cafe"),
    ("coffee_shop", "Cafe"),
    ("bakery", "Bakery"),
    ("ramen_restaurant", "Ramen"),
    ("sushi_restaurant", "Sushi"),
    ("pizza_restaurant", "Pizza"),
    ("italian_restaurant", "Pizza"),
    ("french_restaurant", "French"),
    ("chinese_restaurant", "Chinese"),
    ("steak_house", "Steak"),
    ("dessert_shop", "Desserts"),
    ("japanese_restaurant", "Japanese"),
];

fn keyword_tags(text: &str, tags: &mut BTreeSet<String>) {
    let lower = text.to_lowercase();
    if lower.trim().is_empty() {
        return;
    }
    for (tag, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(&kw.to_lowercase())) {
            tags.insert((*tag).to_string());
        }
    }
}

/// Assign category tags from the source cuisine text, the places API types and
/// the restaurant name. Returns an empty set when nothing matches; applying a
/// fallback tag is up to the caller.
pub fn classify(
    cuisine_text: Option<&str>,
    api_place_types: Option<&[String]>,
    name: &str,
) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if let Some(text) = cuisine_text {
        keyword_tags(text, &mut tags);
    }
    for place_type in api_place_types.unwrap_or_default() {
        if let Some((_, tag)) = TYPE_CATEGORIES
            .iter()
            .find(|(t, _)| *t == place_type.as_str())
        {
            tags.insert((*tag).to_string());
        }
    }
    keyword_tags(name, &mut tags);
    tags
}

fn is_unspecific(tags: &BTreeSet<String>) -> bool {
    tags.is_empty() || (tags.len() == 1 && tags.contains(GENERIC_TAG))
}

/// Re-run classification for records that ended up with no tag or only the
/// generic one. A record is only overwritten when the new set says more.
/// Returns how many records changed.
pub fn reclassify(records: &mut [MergedRecord]) -> usize {
    let mut changed = 0;
    for rec in records.iter_mut().filter(|r| is_unspecific(&r.categories)) {
        let fresh = classify(
            Some(&rec.listing.cuisine_text),
            Some(&rec.place.types),
            &rec.listing.name,
        );
        if !is_unspecific(&fresh) && fresh != rec.categories {
            rec.categories = fresh;
            changed += 1;
        }
    }
    changed
}

/// Give every untagged record the fallback tag.
pub fn apply_default(records: &mut [MergedRecord], default_tag: &str) {
    for rec in records.iter_mut().filter(|r| r.categories.is_empty()) {
        rec.categories.insert(default_tag.to_string());
    }
}

/// Tag → number of records carrying it.
pub fn category_counts<'a, I>(records: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a MergedRecord>,
{
    let mut counts = BTreeMap::new();
    for rec in records {
        for tag in &rec.categories {
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Counts sorted by count descending, then tag name.
pub fn ranked_counts(counts: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
    let mut ranked: Vec<(&str, usize)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
}
