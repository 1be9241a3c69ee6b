//! Derives a catalog of named aggregate statistics from per-element metrics.
//!
//! Given a way to get the elements of a container (e.g. the heaps of a GC, or the GCs of a
//! run) and a getter per element metric, the catalog holds one getter per derived
//! statistic:
//!
//! - bool metric `M`: `CountM`, `PctM`
//! - float metric `M`: `M_Mean`, `M_Max`, `M_Min`, `M_Sum`, `M_95P`, `M_Stdev`
//! - special aggregate `A`: `A`
//!
//! Each is repeated per filter `F`: every bool metric doubles as a filter keeping the
//! elements where it is true, plus any caller filters. Filtered names are `CountMWhereF`,
//! `M_MeanWhereF` and `A_WhereF`. Tools that read these catalogs match on the names, so
//! the format is fixed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::sync::Arc;

use crate::{AggregateFn, Failable, GcJoinError, GcJoinResult, MetricValue, fail};

pub type ElementsFn<'f, C, E> = Arc<dyn Fn(&C) -> Failable<Vec<E>> + Send + Sync + 'f>;
pub type ElementValueFn<'f, C, E, V> =
    Arc<dyn Fn(&C, &[E], usize) -> Failable<V> + Send + Sync + 'f>;
pub type SpecialAggregateFn<'f, C, E> =
    Arc<dyn Fn(&C, &[E]) -> Failable<MetricValue> + Send + Sync + 'f>;
pub type AggregateGetter<'f, C> = Arc<dyn Fn(&C) -> Failable<MetricValue> + Send + Sync + 'f>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Bool,
    Float,
}

pub enum ElementGetter<'f, C, E> {
    Bool(ElementValueFn<'f, C, E, bool>),
    Float(ElementValueFn<'f, C, E, f64>),
}

impl<C, E> Clone for ElementGetter<'_, C, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Bool(f) => Self::Bool(Arc::clone(f)),
            Self::Float(f) => Self::Float(Arc::clone(f)),
        }
    }
}

/// A measurement of one element, looked up by index into the (possibly filtered)
/// element list.
pub struct ElementMetric<'f, C, E> {
    pub name: String,
    pub getter: ElementGetter<'f, C, E>,
}

impl<'f, C, E> ElementMetric<'f, C, E> {
    pub fn bool(
        name: impl Into<String>,
        get: impl Fn(&C, &[E], usize) -> Failable<bool> + Send + Sync + 'f,
    ) -> Self {
        Self {
            name: name.into(),
            getter: ElementGetter::Bool(Arc::new(get)),
        }
    }

    pub fn float(
        name: impl Into<String>,
        get: impl Fn(&C, &[E], usize) -> Failable<f64> + Send + Sync + 'f,
    ) -> Self {
        Self {
            name: name.into(),
            getter: ElementGetter::Float(Arc::new(get)),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.getter {
            ElementGetter::Bool(_) => MetricKind::Bool,
            ElementGetter::Float(_) => MetricKind::Float,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "family", content = "fn", rename_all = "snake_case")]
pub enum AggregateFamily {
    Count,
    Pct,
    Float(AggregateFn),
    Special,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateMetric {
    pub name: String,
    pub family: AggregateFamily,
    /// Element metric it aggregates; `None` for special aggregates.
    pub element_metric: Option<String>,
    /// Filter applied first; empty for all elements.
    pub filter: String,
    pub is_aggregate: bool,
}

pub struct CatalogEntry<'f, C> {
    pub metric: AggregateMetric,
    getter: AggregateGetter<'f, C>,
}

impl<C> CatalogEntry<'_, C> {
    pub fn evaluate(&self, container: &C) -> Failable<MetricValue> {
        (self.getter)(container)
    }
}

pub struct CatalogBuilder<'f, C, E> {
    get_elements: ElementsFn<'f, C, E>,
    element_metrics: Vec<ElementMetric<'f, C, E>>,
    filters: Vec<(String, ElementsFn<'f, C, E>)>,
    special_aggregates: Vec<(String, SpecialAggregateFn<'f, C, E>)>,
}

impl<'f, C: 'f, E: Clone + 'f> CatalogBuilder<'f, C, E> {
    pub fn new(get_elements: impl Fn(&C) -> Failable<Vec<E>> + Send + Sync + 'f) -> Self {
        Self {
            get_elements: Arc::new(get_elements),
            element_metrics: Vec::new(),
            filters: Vec::new(),
            special_aggregates: Vec::new(),
        }
    }

    pub fn element_metric(mut self, metric: ElementMetric<'f, C, E>) -> Self {
        self.element_metrics.push(metric);
        self
    }

    pub fn element_metrics(
        mut self,
        metrics: impl IntoIterator<Item = ElementMetric<'f, C, E>>,
    ) -> Self {
        self.element_metrics.extend(metrics);
        self
    }

    pub fn filter(
        mut self,
        name: impl Into<String>,
        filter: impl Fn(&C) -> Failable<Vec<E>> + Send + Sync + 'f,
    ) -> Self {
        self.filters.push((name.into(), Arc::new(filter)));
        self
    }

    pub fn special_aggregate(
        mut self,
        name: impl Into<String>,
        aggregate: impl Fn(&C, &[E]) -> Failable<MetricValue> + Send + Sync + 'f,
    ) -> Self {
        self.special_aggregates.push((name.into(), Arc::new(aggregate)));
        self
    }

    pub fn build(self) -> GcJoinResult<StatisticsCatalog<'f, C>> {
        let filters = self.all_filters()?;
        let mut catalog = StatisticsCatalog {
            entries: IndexMap::new(),
            filter_names: filters.keys().cloned().collect(),
        };

        for metric in &self.element_metrics {
            for (filter_name, flt) in &filters {
                match &metric.getter {
                    ElementGetter::Bool(get) => {
                        let base = with_filter(&metric.name, filter_name);
                        catalog.insert(
                            aggregate_metric(
                                format!("Count{base}"),
                                AggregateFamily::Count,
                                metric,
                                filter_name,
                            ),
                            count_getter(flt, get),
                        )?;
                        catalog.insert(
                            aggregate_metric(
                                format!("Pct{base}"),
                                AggregateFamily::Pct,
                                metric,
                                filter_name,
                            ),
                            pct_getter(flt, get),
                        )?;
                    }
                    ElementGetter::Float(get) => {
                        for f in AggregateFn::ALL {
                            let name =
                                with_filter(&format!("{}_{}", metric.name, f.name()), filter_name);
                            catalog.insert(
                                aggregate_metric(
                                    name,
                                    AggregateFamily::Float(*f),
                                    metric,
                                    filter_name,
                                ),
                                float_getter(flt, get, *f),
                            )?;
                        }
                    }
                }
            }
        }

        for (filter_name, flt) in &filters {
            for (aggregate_name, aggregate) in &self.special_aggregates {
                let name = if filter_name.is_empty() {
                    aggregate_name.clone()
                } else {
                    format!("{aggregate_name}_Where{filter_name}")
                };
                let metric = AggregateMetric {
                    name,
                    family: AggregateFamily::Special,
                    element_metric: None,
                    filter: filter_name.clone(),
                    is_aggregate: true,
                };
                let flt = Arc::clone(flt);
                let aggregate = Arc::clone(aggregate);
                catalog.insert(
                    metric,
                    Arc::new(move |c: &C| -> Failable<MetricValue> {
                        let elements = flt(c)?;
                        aggregate(c, &elements)
                    }),
                )?;
            }
        }

        Ok(catalog)
    }

    /// `""` first, then caller filters, then one per bool metric.
    fn all_filters(&self) -> GcJoinResult<IndexMap<String, ElementsFn<'f, C, E>>> {
        let mut filters = IndexMap::new();
        filters.insert(String::new(), Arc::clone(&self.get_elements));
        for (name, flt) in &self.filters {
            insert_unique(&mut filters, "filter", name.clone(), Arc::clone(flt))?;
        }

        let mut seen = IndexMap::new();
        for metric in &self.element_metrics {
            insert_unique(&mut seen, "element metric", metric.name.clone(), ())?;
            if let ElementGetter::Bool(get) = &metric.getter {
                insert_unique(
                    &mut filters,
                    "filter",
                    metric.name.clone(),
                    bool_filter(&self.get_elements, get),
                )?;
            }
        }
        Ok(filters)
    }
}

fn insert_unique<V>(
    map: &mut IndexMap<String, V>,
    kind: &'static str,
    name: String,
    value: V,
) -> GcJoinResult<()> {
    if map.contains_key(&name) {
        return Err(GcJoinError::DuplicateName { kind, name });
    }
    map.insert(name, value);
    Ok(())
}

fn with_filter(base: &str, filter_name: &str) -> String {
    if filter_name.is_empty() {
        base.to_string()
    } else {
        format!("{base}Where{filter_name}")
    }
}

fn aggregate_metric<C, E>(
    name: String,
    family: AggregateFamily,
    metric: &ElementMetric<'_, C, E>,
    filter_name: &str,
) -> AggregateMetric {
    AggregateMetric {
        name,
        family,
        element_metric: Some(metric.name.clone()),
        filter: filter_name.to_string(),
        is_aggregate: true,
    }
}

fn bool_filter<'f, C: 'f, E: Clone + 'f>(
    get_elements: &ElementsFn<'f, C, E>,
    get: &ElementValueFn<'f, C, E, bool>,
) -> ElementsFn<'f, C, E> {
    let get_elements = Arc::clone(get_elements);
    let get = Arc::clone(get);
    Arc::new(move |c: &C| -> Failable<Vec<E>> {
        let elements = get_elements(c)?;
        let mut out = Vec::new();
        for (i, e) in elements.iter().enumerate() {
            if get(c, &elements, i)? {
                out.push(e.clone());
            }
        }
        Ok(out)
    })
}

fn count_true<C, E>(
    c: &C,
    elements: &[E],
    get: &ElementValueFn<'_, C, E, bool>,
) -> Failable<usize> {
    let mut count = 0;
    for i in 0..elements.len() {
        if get(c, elements, i)? {
            count += 1;
        }
    }
    Ok(count)
}

fn count_getter<'f, C: 'f, E: 'f>(
    flt: &ElementsFn<'f, C, E>,
    get: &ElementValueFn<'f, C, E, bool>,
) -> AggregateGetter<'f, C> {
    let flt = Arc::clone(flt);
    let get = Arc::clone(get);
    Arc::new(move |c: &C| -> Failable<MetricValue> {
        let elements = flt(c)?;
        let count = count_true(c, &elements, &get)?;
        Ok(MetricValue::Int(count as i64))
    })
}

fn pct_getter<'f, C: 'f, E: 'f>(
    flt: &ElementsFn<'f, C, E>,
    get: &ElementValueFn<'f, C, E, bool>,
) -> AggregateGetter<'f, C> {
    let flt = Arc::clone(flt);
    let get = Arc::clone(get);
    Arc::new(move |c: &C| -> Failable<MetricValue> {
        let elements = flt(c)?;
        if elements.is_empty() {
            return fail("can't get pct with no elements");
        }
        let count = count_true(c, &elements, &get)?;
        Ok(MetricValue::Float(100.0 * count as f64 / elements.len() as f64))
    })
}

fn float_getter<'f, C: 'f, E: 'f>(
    flt: &ElementsFn<'f, C, E>,
    get: &ElementValueFn<'f, C, E, f64>,
    aggregate: AggregateFn,
) -> AggregateGetter<'f, C> {
    let flt = Arc::clone(flt);
    let get = Arc::clone(get);
    Arc::new(move |c: &C| -> Failable<MetricValue> {
        let elements = flt(c)?;
        let values = (0..elements.len())
            .map(|i| get(c, &elements, i))
            .collect::<Failable<Vec<f64>>>()?;
        aggregate.apply(&values).map(MetricValue::Float)
    })
}

/// Named aggregate getters over containers of type `C`, in construction order.
pub struct StatisticsCatalog<'f, C> {
    entries: IndexMap<String, CatalogEntry<'f, C>>,
    filter_names: Vec<String>,
}

impl<'f, C> StatisticsCatalog<'f, C> {
    fn insert(
        &mut self,
        metric: AggregateMetric,
        getter: AggregateGetter<'f, C>,
    ) -> GcJoinResult<()> {
        let name = metric.name.clone();
        insert_unique(&mut self.entries, "aggregate metric", name, CatalogEntry { metric, getter })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &AggregateMetric> {
        self.entries.values().map(|e| &e.metric)
    }

    pub fn filter_names(&self) -> &[String] {
        &self.filter_names
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry<'f, C>> {
        self.entries.get(name)
    }

    /// Asking for a metric the catalog never defined is a caller bug, not missing data.
    pub fn evaluate(&self, name: &str, container: &C) -> GcJoinResult<Failable<MetricValue>> {
        self.get(name)
            .map(|e| e.evaluate(container))
            .ok_or_else(|| GcJoinError::UnknownMetric(name.to_string()))
    }

    pub fn evaluate_all(&self, container: &C) -> IndexMap<String, Failable<MetricValue>> {
        self.entries
            .iter()
            .map(|(name, e)| (name.clone(), e.evaluate(container)))
            .collect()
    }

    pub fn evaluate_selected<S: AsRef<str>>(
        &self,
        names: &[S],
        container: &C,
    ) -> GcJoinResult<IndexMap<String, Failable<MetricValue>>> {
        let mut out = IndexMap::new();
        for name in names {
            let name = name.as_ref();
            out.insert(name.to_string(), self.evaluate(name, container)?);
        }
        Ok(out)
    }
}

impl<C> fmt::Debug for StatisticsCatalog<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsCatalog")
            .field("filters", &self.filter_names)
            .field("metrics", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
