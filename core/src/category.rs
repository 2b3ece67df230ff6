use std::cmp::Ordering;

use crate::models::DEFAULT_CATEGORY;

/// Order in which category groups are shown, walking a typical store.
const AISLE_ORDER: &[&str] = &[
    "Produce",
    "Bakery",
    "Meat & Seafood",
    "Dairy & Eggs",
    "Frozen",
    "Pantry Staples",
    "Spices & Seasonings",
    "Beverages",
    "Household",
];

/// Keywords that select each category. Multi-word phrases are tried before
/// single words, so "peanut butter" is a staple and "black pepper" a spice.
/// Within a pass the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Pantry Staples",
        &[
            "peanut butter",
            "coconut milk",
            "tomato paste",
            "canned tomatoes",
            "flour",
            "sugar",
            "rice",
            "pasta",
            "spaghetti",
            "noodles",
            "oats",
            "cereal",
            "beans",
            "lentils",
            "chickpeas",
            "oil",
            "vinegar",
            "honey",
            "syrup",
            "jam",
            "stock",
            "broth",
            "sauce",
            "ketchup",
            "mustard",
            "mayonnaise",
            "nuts",
            "almonds",
            "walnuts",
            "baking powder",
            "baking soda",
            "yeast",
            "cocoa",
            "chocolate",
        ],
    ),
    (
        "Produce",
        &[
            "apple", "banana", "orange", "lemon", "lime", "berries", "strawberry",
            "blueberry", "grape", "pear", "peach", "mango", "pineapple", "avocado",
            "tomato", "potato", "onion", "garlic", "carrot", "celery", "lettuce",
            "spinach", "kale", "cabbage", "broccoli", "cauliflower", "cucumber",
            "zucchini", "pepper", "eggplant", "mushroom", "ginger", "herbs",
            "parsley", "cilantro", "basil", "mint", "leek", "scallion",
        ],
    ),
    (
        "Meat & Seafood",
        &[
            "chicken", "beef", "pork", "lamb", "turkey", "bacon", "ham", "sausage",
            "mince", "steak", "fish", "salmon", "tuna", "cod", "shrimp", "prawn",
        ],
    ),
    (
        "Dairy & Eggs",
        &[
            "milk", "cheese", "butter", "yogurt", "yoghurt", "cream", "egg", "mozzarella",
            "parmesan", "cheddar", "feta",
        ],
    ),
    (
        "Bakery",
        &["bread", "baguette", "bagel", "bun", "roll", "tortilla", "croissant", "pita"],
    ),
    (
        "Frozen",
        &["frozen", "ice cream", "peas"],
    ),
    (
        "Beverages",
        &["water", "juice", "coffee", "tea", "soda", "beer", "wine"],
    ),
    (
        "Spices & Seasonings",
        &[
            "black pepper", "white pepper", "peppercorn", "salt", "cumin", "paprika",
            "cinnamon", "oregano", "thyme", "rosemary",
            "nutmeg", "turmeric", "curry", "chili", "vanilla", "spice",
        ],
    ),
    (
        "Household",
        &[
            "soap", "detergent", "paper", "towel", "foil", "wrap", "sponge", "bags",
        ],
    ),
];

/// Guess the store category for an item name from keywords. Unknown items
/// land in `Other`.
#[must_use]
pub fn classify(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for phrases in [true, false] {
        for (category, keywords) in CATEGORY_KEYWORDS {
            let hit = keywords
                .iter()
                .filter(|kw| kw.contains(' ') == phrases)
                .any(|kw| keyword_matches(kw, &lower, &words));
            if hit {
                return category;
            }
        }
    }
    DEFAULT_CATEGORY
}

fn keyword_matches(keyword: &str, lower: &str, words: &[&str]) -> bool {
    if keyword.contains(' ') {
        return lower.contains(keyword);
    }
    words.iter().any(|w| {
        *w == keyword
            || w.strip_suffix('s') == Some(keyword)
            || w.strip_suffix("es") == Some(keyword)
            || (keyword.ends_with('y') && w.strip_suffix("ies") == keyword.strip_suffix('y'))
    })
}

/// Position of a category in aisle order; `None` for user-defined ones.
#[must_use]
pub fn canonical_rank(category: &str) -> Option<usize> {
    AISLE_ORDER
        .iter()
        .position(|name| name.eq_ignore_ascii_case(category))
}

/// Display order for category groups: known categories in aisle order, then
/// user-defined ones alphabetically, `Other` last.
#[must_use]
pub fn compare_categories(a: &str, b: &str) -> Ordering {
    let is_other = |c: &str| c.eq_ignore_ascii_case(DEFAULT_CATEGORY);
    match (is_other(a), is_other(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    match (canonical_rank(a), canonical_rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}
