//! Running cart and the reducer that folds cart-update events into it

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Cart lines addressed by item name
pub type Cart = BTreeMap<String, CartLine>;

/// A confirmed line in the cart. `quantity` is always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CartCommand {
    Reset,
}

/// An instruction to add, remove, or reset cart lines
///
/// Removal is a negative `quantity` against an existing line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CartUpdate {
    #[serde(default)]
    pub name: Option<String>,

    /// Unit price; `null` reads as 0
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: f64,

    /// Accepts whole floats (`2.0`) and numeric strings
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CartCommand>,
}

impl CartUpdate {
    pub fn item(name: impl Into<String>, price: f64, quantity: i64) -> Self {
        Self {
            name: Some(name.into()),
            price,
            quantity,
            command: None,
        }
    }

    pub fn reset() -> Self {
        Self {
            command: Some(CartCommand::Reset),
            ..Self::default()
        }
    }

    pub fn is_reset(&self) -> bool {
        self.command == Some(CartCommand::Reset)
    }
}

fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("price out of range")),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('$')
            .parse()
            .map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid price: {}", other))),
    }
}

fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let whole = |f: f64| {
        if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 {
            Ok(f as i64)
        } else {
            Err(de::Error::custom(format!("quantity is not a whole number: {}", f)))
        }
    };

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(q), _) => Ok(q),
            (None, Some(f)) => whole(f),
            (None, None) => Err(de::Error::custom("quantity out of range")),
        },
        Some(Value::String(s)) => s.trim().parse().map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid quantity: {}", other))),
    }
}

/// Fold a batch of updates into a prior cart
///
/// - `None` leaves the cart untouched.
/// - A batch containing RESET yields an empty cart, whatever else it holds.
/// - Existing lines accumulate quantity and are dropped once it reaches zero.
/// - Unknown names only create a line for a positive quantity and a
///   non-negative price.
/// - An update that would overflow a line's quantity is ignored.
pub fn reduce(prior: &Cart, updates: Option<&[CartUpdate]>) -> Cart {
    let Some(updates) = updates else {
        return prior.clone();
    };

    if updates.iter().any(CartUpdate::is_reset) {
        return Cart::new();
    }

    let mut cart = prior.clone();
    for update in updates {
        let Some(name) = update.name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };

        match cart.get_mut(name) {
            Some(line) => match line.quantity.checked_add(update.quantity) {
                Some(quantity) if quantity > 0 => line.quantity = quantity,
                Some(_) => {
                    cart.remove(name);
                }
                None => {
                    tracing::warn!(item = name, quantity = update.quantity, "Ignoring overflowing cart update");
                }
            },
            None if update.quantity > 0 && !valid_price(update.price) => {
                tracing::warn!(item = name, price = update.price, "Ignoring cart line with invalid price");
            }
            None if update.quantity > 0 => {
                cart.insert(
                    name.to_string(),
                    CartLine {
                        name: name.to_string(),
                        price: update.price,
                        quantity: update.quantity,
                    },
                );
            }
            None => {}
        }
    }
    cart
}

fn valid_price(price: f64) -> bool {
    price.is_finite() && price >= 0.0
}

/// Sum of price x quantity over every line
pub fn cart_total(cart: &Cart) -> f64 {
    cart.values()
        .map(|line| line.price * line.quantity as f64)
        .sum()
}

/// Render the cart as receipt rows followed by the total
pub fn render_receipt(cart: &Cart) -> String {
    let mut lines: Vec<String> = cart
        .values()
        .map(|line| format!("- {}x {} (${:.2})", line.quantity, line.name, line.price))
        .collect();
    lines.push("----------------".to_string());
    lines.push(format!("Total: ${:.2}", cart_total(cart)));
    lines.join("\n")
}
