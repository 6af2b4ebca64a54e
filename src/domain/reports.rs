//! Sales and customer reports over placed orders.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use rust_decimal::Decimal;
use uuid::Uuid;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<OrderStatus>,
    /// Case-insensitive substring of the customer name.
    pub customer: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, order: &Order) -> bool {
        let day = order.created_at.date_naive();
        if self.from.is_some_and(|from| day < from) { return false; }
        if self.to.is_some_and(|to| day > to) { return false; }
        if self.status.is_some_and(|status| order.status() != status) { return false; }
        match self.customer.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(needle) => order.customer.name.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub orders: u32,
    pub revenue: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaleRow {
    pub order_number: String,
    pub date: NaiveDate,
    pub customer: String,
    pub status: OrderStatus,
    pub total: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SalesReport {
    pub total_revenue: Money,
    pub order_count: u32,
    pub average_order: Money,
    pub unique_customers: u32,
    pub by_date: BTreeMap<NaiveDate, DaySummary>,
    pub rows: Vec<SaleRow>,
}

impl SalesReport {
    pub fn build<'a>(orders: impl IntoIterator<Item = &'a Order>, filter: &ReportFilter) -> Self {
        let mut report = Self::default();
        let mut customers = HashSet::new();
        for order in orders.into_iter().filter(|o| filter.matches(o)) {
            let date = order.created_at.date_naive();
            report.total_revenue = report.total_revenue.add(order.total());
            report.order_count += 1;
            customers.insert(order.customer.name.to_lowercase());
            let day = report.by_date.entry(date).or_default();
            day.orders += 1;
            day.revenue = day.revenue.add(order.total());
            report.rows.push(SaleRow {
                order_number: order.order_number.clone(),
                date,
                customer: order.customer.name.clone(),
                status: order.status(),
                total: order.total(),
            });
        }
        report.unique_customers = u32::try_from(customers.len()).unwrap_or(u32::MAX);
        if report.order_count > 0 {
            report.average_order = Money::new(report.total_revenue.amount() / Decimal::from(report.order_count));
        }
        report.rows.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.order_number.cmp(&b.order_number)));
        report
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("order_number,date,customer,status,total\n");
        for row in &self.rows {
            out.push_str(&format!("{},{},{},{},{}\n", row.order_number, row.date, csv_field(&row.customer), row.status, row.total));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) { format!("\"{}\"", value.replace('"', "\"\"")) } else { value.to_string() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Vip,
    Frequent,
    Regular,
}

impl CustomerTier {
    pub fn for_spend(total: Money) -> Self {
        if total > Money::from_cents(40_000) {
            Self::Vip
        } else if total > Money::from_cents(20_000) {
            Self::Frequent
        } else {
            Self::Regular
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CustomerFilter {
    /// Case-insensitive substring of name or email, or part of the phone number.
    pub q: Option<String>,
}

impl CustomerFilter {
    fn matches(&self, customer: &CustomerSummary) -> bool {
        let Some(needle) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) else { return true };
        let needle_lower = needle.to_lowercase();
        let digits = phone_digits(needle);
        customer.name.to_lowercase().contains(&needle_lower)
            || customer.email.as_deref().is_some_and(|e| e.to_lowercase().contains(&needle_lower))
            || customer.phone.contains(needle)
            || (!digits.is_empty() && phone_digits(&customer.phone).contains(&digits))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CustomerOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub placed_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub total: Money,
}

/// Everything ordered under one phone number. Name and email come from the
/// most recent order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CustomerSummary {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub order_count: u32,
    pub total_spent: Money,
    pub average_order: Money,
    pub tier: CustomerTier,
    pub last_order_at: DateTime<Utc>,
    /// Newest first.
    pub orders: Vec<CustomerOrder>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CustomerReport {
    pub total_customers: u32,
    pub total_orders: u32,
    pub total_revenue: Money,
    pub average_spent: Money,
    /// Customers matching the filter, biggest spenders first.
    pub customers: Vec<CustomerSummary>,
}

fn phone_digits(phone: &str) -> String { phone.chars().filter(char::is_ascii_digit).collect() }

fn customer_key(phone: &str) -> String {
    let digits = phone_digits(phone);
    if digits.is_empty() { phone.trim().to_lowercase() } else { digits }
}

impl CustomerReport {
    /// Totals cover every customer; `customers` only the ones `filter` matches.
    pub fn build<'a>(orders: impl IntoIterator<Item = &'a Order>, filter: &CustomerFilter) -> Self {
        let mut by_phone: HashMap<String, Vec<&Order>> = HashMap::new();
        for order in orders {
            by_phone.entry(customer_key(&order.customer.phone)).or_default().push(order);
        }

        let mut report = Self::default();
        for mut placed in by_phone.into_values() {
            placed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let Some(latest) = placed.first() else { continue };
            let total_spent = placed.iter().fold(Money::ZERO, |sum, o| sum.add(o.total()));
            let order_count = u32::try_from(placed.len()).unwrap_or(u32::MAX);
            let summary = CustomerSummary {
                name: latest.customer.name.clone(),
                phone: latest.customer.phone.clone(),
                email: placed.iter().find_map(|o| o.customer.email.clone()),
                order_count,
                total_spent,
                average_order: Money::new(total_spent.amount() / Decimal::from(order_count)),
                tier: CustomerTier::for_spend(total_spent),
                last_order_at: latest.created_at,
                orders: placed.iter().map(|o| CustomerOrder {
                    order_id: o.id,
                    order_number: o.order_number.clone(),
                    placed_at: o.created_at,
                    status: o.status(),
                    total: o.total(),
                }).collect(),
            };

            report.total_customers += 1;
            report.total_orders += order_count;
            report.total_revenue = report.total_revenue.add(total_spent);
            if filter.matches(&summary) { report.customers.push(summary); }
        }
        if report.total_customers > 0 {
            report.average_spent = Money::new(report.total_revenue.amount() / Decimal::from(report.total_customers));
        }
        report.customers.sort_by(|a, b| b.total_spent.cmp(&a.total_spent).then_with(|| a.name.cmp(&b.name)));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::domain::aggregates::{CustomerSnapshot, NewOrder, PaymentMethod, Pricing};

    fn order(name: &str, day: u32, cents: i64) -> Order { order_from(name, "1", None, day, cents) }

    fn order_from(name: &str, phone: &str, email: Option<&str>, day: u32, cents: i64) -> Order {
        let mut order = Order::place(NewOrder {
            customer_id: None,
            customer: CustomerSnapshot { name: name.into(), phone: phone.into(), email: email.map(str::to_string) },
            delivery_address: "Rua Nova, 789 - Vila Verde".into(),
            payment_method: PaymentMethod::Cash,
            notes: None,
            coupon_code: None,
            pricing: Pricing { subtotal: Money::from_cents(cents), delivery_fee: Money::ZERO, discount: Money::ZERO, total: Money::from_cents(cents) },
        });
        order.created_at = Utc.with_ymd_and_hms(2024, 1, day, 14, 30, 0).unwrap();
        order
    }

    #[test]
    fn test_summary() {
        let orders = vec![order("João Silva", 15, 4780), order("Maria, Santos", 15, 4180), order("joão silva", 16, 1000)];
        let report = SalesReport::build(&orders, &ReportFilter::default());
        assert_eq!(report.order_count, 3);
        assert_eq!(report.total_revenue, Money::from_cents(9960));
        assert_eq!(report.average_order, Money::from_cents(3320));
        assert_eq!(report.unique_customers, 2);
        assert_eq!(report.by_date.len(), 2);
        assert_eq!(report.rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert!(report.to_csv().contains("\"Maria, Santos\""));
    }

    #[test]
    fn test_filters() {
        let mut orders = vec![order("João Silva", 15, 4780), order("Pedro Costa", 20, 4180)];
        orders[1].advance().unwrap();
        let filter = ReportFilter { from: NaiveDate::from_ymd_opt(2024, 1, 16), ..ReportFilter::default() };
        assert_eq!(SalesReport::build(&orders, &filter).order_count, 1);
        let filter = ReportFilter { status: Some(OrderStatus::Received), customer: Some("JOÃO".into()), ..ReportFilter::default() };
        let report = SalesReport::build(&orders, &filter);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].customer, "João Silva");
        assert_eq!(SalesReport::build(&orders, &ReportFilter::default()).to_csv().lines().count(), 3);
    }

    fn customers() -> Vec<Order> {
        vec![
            order_from("João Silva", "(11) 99999-1234", Some("joao@email.com"), 5, 25_000),
            order_from("João S.", "11999991234", None, 15, 20_000),
            order_from("Maria Santos", "(11) 98888-5678", Some("maria@email.com"), 14, 30_000),
            order_from("Pedro Costa", "(11) 97777-9876", None, 13, 8_990),
        ]
    }

    #[test]
    fn test_customers_grouped_by_phone() {
        let report = CustomerReport::build(&customers(), &CustomerFilter::default());
        assert_eq!(report.total_customers, 3);
        assert_eq!(report.total_orders, 4);
        assert_eq!(report.total_revenue, Money::from_cents(83_990));

        let joao = &report.customers[0];
        assert_eq!(joao.name, "João S.");
        assert_eq!(joao.email.as_deref(), Some("joao@email.com"));
        assert_eq!(joao.order_count, 2);
        assert_eq!(joao.total_spent, Money::from_cents(45_000));
        assert_eq!(joao.average_order, Money::from_cents(22_500));
        assert_eq!(joao.tier, CustomerTier::Vip);
        assert_eq!(joao.orders.len(), 2);
        assert!(joao.orders[0].placed_at > joao.orders[1].placed_at);

        assert_eq!(report.customers[1].tier, CustomerTier::Frequent);
        assert_eq!(report.customers[2].tier, CustomerTier::Regular);
    }

    #[test]
    fn test_tier_thresholds_are_exclusive() {
        assert_eq!(CustomerTier::for_spend(Money::from_cents(40_000)), CustomerTier::Frequent);
        assert_eq!(CustomerTier::for_spend(Money::from_cents(40_001)), CustomerTier::Vip);
        assert_eq!(CustomerTier::for_spend(Money::from_cents(20_000)), CustomerTier::Regular);
    }

    #[test]
    fn test_customer_search() {
        let orders = customers();
        let search = |q: &str| {
            let report = CustomerReport::build(&orders, &CustomerFilter { q: Some(q.into()) });
            assert_eq!(report.total_customers, 3);
            report.customers.into_iter().map(|c| c.name).collect::<Vec<_>>()
        };
        assert_eq!(search("MARIA@"), vec!["Maria Santos"]);
        assert_eq!(search("costa"), vec!["Pedro Costa"]);
        assert_eq!(search("97777-98"), vec!["Pedro Costa"]);
        assert_eq!(search("999991234"), vec!["João S."]);
        assert!(search("nobody").is_empty());
        assert_eq!(search("  ").len(), 3);
    }
}
