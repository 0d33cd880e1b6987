//! Etapa de parsing: de candidatos (nombre, precio) sin tipar a `ParsedDish`.
//!
//! El precio se conserva exactamente como aparece en la carta (símbolo,
//! separadores y orden incluidos); sólo se limpia el nombre.

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ErrorKind, ProcessingError},
    models::{DishCandidate, ParsedDish},
};

/// Confianza asumida cuando el servicio de visión no informa ninguna.
const DEFAULT_EXTRACTION_CONFIDENCE: f32 = 0.9;
const BARE_PRICE_FACTOR: f32 = 0.9;
const MISSING_PRICE_FACTOR: f32 = 0.6;

const PREFIX_PRICE: &str = r"(?:R\$|US\$|CHF|[$€£¥₩₹₽₺฿₫₱])\s?\d+(?:[.,']\d{3})*(?:[.,]\d{1,2})?";
const SUFFIX_PRICE: &str = r"\d+(?:[.,']\d{3})*(?:[.,]\d{1,2})?\s?(?:[$€£¥₩₹₽₺฿₫₱]|円|元|원|(?i:(?:usd|eur|gbp|cad|aud|chf|jpy|kr|zł|kč|dollars?|euros?|pounds?|yen)\b))";
const BARE_PRICE: &str = r"\d+(?:[.,']\d{3})*(?:[.,]\d{1,2})?";
const TRAILING_BARE_PRICE: &str = r"(?:^|\s)(\d+(?:[.,']\d{3})*(?:[.,]\d{1,2})?)\s*$";
const LEADERS: &str = r"[.…·_]{2,}|[-–—]{2,}";

const NAME_SEPARATORS: &[char] = &[
    '.', '-', '–', '—', '_', ':', '·', '…', '|', '/', ',', '*', '•',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceMatch {
    Currency,
    Bare,
    Missing,
}

/// Resultado de la etapa. Nunca falla: como mucho trae un error de
/// pipeline avisando de que no se encontró ningún plato.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub dishes: Vec<ParsedDish>,
    pub stats: ParsingStats,
    pub error: Option<ProcessingError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsingStats {
    pub total_dishes: usize,
    pub dishes_with_price: usize,
    pub dropped_candidates: usize,
    pub average_confidence: f32,
    pub low_confidence: usize,
    pub medium_confidence: usize,
    pub high_confidence: usize,
}

impl ParsingStats {
    fn from_dishes(dishes: &[ParsedDish], dropped: usize) -> Self {
        let mut stats = Self {
            total_dishes: dishes.len(),
            dropped_candidates: dropped,
            ..Default::default()
        };
        if dishes.is_empty() {
            return stats;
        }
        for dish in dishes {
            if !dish.price_text.is_empty() {
                stats.dishes_with_price += 1;
            }
            match dish.confidence {
                c if c < 0.5 => stats.low_confidence += 1,
                c if c < 0.8 => stats.medium_confidence += 1,
                _ => stats.high_confidence += 1,
            }
        }
        stats.average_confidence =
            dishes.iter().map(|d| d.confidence).sum::<f32>() / dishes.len() as f32;
        stats
    }
}

pub struct MenuParser {
    currency: Regex,
    bare: Regex,
    trailing_bare: Regex,
    leaders: Regex,
    max_dishes: usize,
}

impl MenuParser {
    pub fn new(max_dishes: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            currency: Regex::new(&format!("{PREFIX_PRICE}|{SUFFIX_PRICE}"))?,
            bare: Regex::new(BARE_PRICE)?,
            trailing_bare: Regex::new(TRAILING_BARE_PRICE)?,
            leaders: Regex::new(LEADERS)?,
            max_dishes: max_dishes.max(1),
        })
    }

    pub fn parse(&self, candidates: &[DishCandidate]) -> ParseOutcome {
        let mut dishes = Vec::with_capacity(candidates.len());
        let mut dropped = 0;

        for (position, candidate) in candidates.iter().enumerate() {
            match self.parse_candidate(candidate, position) {
                Some(dish) => dishes.push(dish),
                None => {
                    dropped += 1;
                    debug!("Candidato descartado sin nombre reconocible: {:?}", candidate.name_text);
                }
            }
        }

        if dishes.len() > self.max_dishes {
            warn!(
                "La carta tiene {} platos; se conservan los {} primeros",
                dishes.len(),
                self.max_dishes
            );
            dishes.truncate(self.max_dishes);
        }

        let stats = ParsingStats::from_dishes(&dishes, dropped);
        info!("Parsing completado: {} platos ({} descartados)", dishes.len(), dropped);
        debug!("Estadísticas de parsing: {:?}", stats);

        let error = dishes.is_empty().then(|| {
            ProcessingError::new(
                ErrorKind::Parsing,
                "No se ha identificado ningún plato en la carta. Prueba con una foto más nítida, \
                 bien iluminada, sin reflejos y con la carta completa en el encuadre.",
            )
        });

        ParseOutcome { dishes, stats, error }
    }

    fn parse_candidate(&self, candidate: &DishCandidate, position: usize) -> Option<ParsedDish> {
        let line = candidate.name_text.trim();
        let price_field = candidate.price_text.trim();

        let (mut name_part, price_text, price_match) = if price_field.is_empty() {
            self.split_price_from_line(line)
        } else {
            let (price, kind) = self.isolate_price(price_field);
            (line.to_string(), price, kind)
        };

        // El nombre a veces repite el precio al final ("Pizza €8" + "€8").
        if !price_field.is_empty() && !price_text.is_empty() {
            if let Some(stripped) = name_part.trim_end().strip_suffix(price_text.as_str()) {
                name_part = stripped.to_string();
            }
        }

        let name = self.clean_name(&name_part);
        if !name.chars().any(char::is_alphabetic) {
            return None;
        }

        let base = candidate
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_EXTRACTION_CONFIDENCE);
        let confidence = match price_match {
            PriceMatch::Currency => base,
            PriceMatch::Bare => base * BARE_PRICE_FACTOR,
            PriceMatch::Missing => base * MISSING_PRICE_FACTOR,
        };

        Some(ParsedDish {
            id: Uuid::new_v4().to_string(),
            name,
            original_name: candidate.name_text.clone(),
            price_text,
            confidence,
            source_position: position,
        })
    }

    /// Precio desde el campo dedicado: del primer al último importe, tal cual
    /// ("€8 / €12" se conserva entero).
    fn isolate_price(&self, field: &str) -> (String, PriceMatch) {
        for (regex, kind) in [(&self.currency, PriceMatch::Currency), (&self.bare, PriceMatch::Bare)] {
            let mut matches = regex.find_iter(field);
            if let Some(first) = matches.next() {
                let end = matches.last().map_or(first.end(), |m| m.end());
                return (field[first.start()..end].to_string(), kind);
            }
        }
        (String::new(), PriceMatch::Missing)
    }

    /// Precio incrustado en la línea del nombre: el último importe con
    /// moneda o, si no hay, un número suelto al final de la línea.
    fn split_price_from_line(&self, line: &str) -> (String, String, PriceMatch) {
        if let Some(m) = self.currency.find_iter(line).last() {
            let name = format!("{} {}", &line[..m.start()], &line[m.end()..]);
            return (name, m.as_str().to_string(), PriceMatch::Currency);
        }
        if let Some(m) = self.trailing_bare.captures(line).and_then(|c| c.get(1)) {
            return (line[..m.start()].to_string(), m.as_str().to_string(), PriceMatch::Bare);
        }
        (line.to_string(), String::new(), PriceMatch::Missing)
    }

    fn clean_name(&self, raw: &str) -> String {
        let without_leaders = self.leaders.replace_all(raw, " ");
        let collapsed = without_leaders.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
            .trim_matches(|c: char| c.is_whitespace() || NAME_SEPARATORS.contains(&c))
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn parser() -> MenuParser {
        MenuParser::new(50).unwrap()
    }

    fn parse_one(name: &str, price: &str) -> ParsedDish {
        let outcome = parser().parse(&[DishCandidate::new(name, price)]);
        outcome.dishes.into_iter().next().expect("se esperaba un plato")
    }

    #[test]
    fn prices_in_the_name_line_are_split_out() {
        let dish = parse_one("Margherita — €8.50", "");
        assert_eq!(dish.name, "Margherita");
        assert_eq!(dish.price_text, "€8.50");
        assert_eq!(dish.original_name, "Margherita — €8.50");

        let dish = parse_one("Bolognese — €10", "");
        assert_eq!(dish.name, "Bolognese");
        assert_eq!(dish.price_text, "€10");
    }

    #[test]
    fn price_text_is_preserved_verbatim() {
        for price in ["€8.50", "$1,299.99", "12,50 €", "¥1200", "350 ₽", "£7", "R$ 32,90", "15.00 EUR", "1.200円"] {
            let dish = parse_one("Plato", price);
            assert_eq!(dish.price_text, price, "precio alterado");
        }
        let dish = parse_one("Carbonara ........ 9,50 €", "");
        assert_eq!(dish.price_text, "9,50 €");
        assert_eq!(dish.name, "Carbonara");
    }

    #[test]
    fn multiple_prices_keep_their_full_span() {
        let dish = parse_one("Pizza", " €8 / €12 ");
        assert_eq!(dish.price_text, "€8 / €12");
    }

    #[test]
    fn repeated_price_is_removed_from_the_name() {
        let dish = parse_one("Tiramisù €6", "€6");
        assert_eq!(dish.name, "Tiramisù");
        assert_eq!(dish.price_text, "€6");
    }

    #[test]
    fn numbers_inside_names_are_not_prices() {
        let dish = parse_one("Pizza 4 Formaggi", "");
        assert_eq!(dish.name, "Pizza 4 Formaggi");
        assert_eq!(dish.price_text, "");

        let dish = parse_one("Pizza 4 Formaggi 11.50", "");
        assert_eq!(dish.name, "Pizza 4 Formaggi");
        assert_eq!(dish.price_text, "11.50");
    }

    #[test]
    fn trailing_prices_with_thousands_separators_are_split() {
        let dish = parse_one("김치찌개 8,000", "");
        assert_eq!(dish.name, "김치찌개");
        assert_eq!(dish.price_text, "8,000");

        let dish = parse_one("Pizza 1.200", "");
        assert_eq!(dish.name, "Pizza");
        assert_eq!(dish.price_text, "1.200");
    }

    #[test]
    fn missing_price_keeps_dish_with_lower_confidence() {
        let with_price = parse_one("Gazpacho", "5 €");
        let without_price = parse_one("Gazpacho", "");
        let unparseable = parse_one("Gazpacho", "según mercado");
        assert_eq!(without_price.price_text, "");
        assert_eq!(unparseable.price_text, "");
        assert!(without_price.confidence < with_price.confidence);
        assert!(unparseable.confidence < with_price.confidence);
    }

    #[test]
    fn extraction_confidence_is_used_and_clamped() {
        let mut candidate = DishCandidate::new("Ramen", "¥900");
        candidate.confidence = Some(0.42);
        let dish = parser().parse(&[candidate.clone()]).dishes.remove(0);
        assert!((dish.confidence - 0.42).abs() < f32::EPSILON);

        candidate.confidence = Some(7.0);
        let dish = parser().parse(&[candidate]).dishes.remove(0);
        assert!(dish.confidence <= 1.0);
    }

    #[test]
    fn nameless_candidates_are_dropped() {
        let outcome = parser().parse(&[
            DishCandidate::new("   ", "€5"),
            DishCandidate::new("-----", ""),
            DishCandidate::new("12.50", ""),
            DishCandidate::new("Sopa", "€4"),
        ]);
        assert_eq!(outcome.dishes.len(), 1);
        assert_eq!(outcome.dishes[0].source_position, 3);
        assert_eq!(outcome.stats.dropped_candidates, 3);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn non_latin_names_survive() {
        let dish = parse_one("  麻婆豆腐  ", "¥1200");
        assert_eq!(dish.name, "麻婆豆腐");
        assert_eq!(dish.original_name, "  麻婆豆腐  ");

        let dish = parse_one("Борщ 350 ₽", "");
        assert_eq!(dish.name, "Борщ");
        assert_eq!(dish.price_text, "350 ₽");
    }

    #[test]
    fn empty_result_reports_a_parsing_error() {
        let outcome = parser().parse(&[]);
        assert!(outcome.dishes.is_empty());
        let err = outcome.error.expect("debe avisar de la calidad de la imagen");
        assert_eq!(err.kind, ErrorKind::Parsing);
        assert!(err.recoverable);
        assert!(err.message.contains("foto"));
    }

    #[test]
    fn ids_are_unique_and_list_is_capped() {
        let candidates: Vec<_> = (0..10)
            .map(|i| DishCandidate::new(format!("Plato {i}"), "€1"))
            .collect();
        let outcome = MenuParser::new(4).unwrap().parse(&candidates);
        assert_eq!(outcome.dishes.len(), 4);

        let ids: HashSet<_> = parser().parse(&candidates).dishes.into_iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn stats_are_computed() {
        let outcome = parser().parse(&[DishCandidate::new("Sopa", "€4"), DishCandidate::new("Pan", "")]);
        assert_eq!(outcome.stats.total_dishes, 2);
        assert_eq!(outcome.stats.dishes_with_price, 1);
        assert!(outcome.stats.average_confidence > 0.0);
    }
}
