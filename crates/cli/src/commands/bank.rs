//! Bank maintenance commands

use aftershock_bank::{EventQuery, TemplateBank};
use aftershock_core::{Config, Region, UtcTime};
use anyhow::{Context, Result};

use crate::BankCommand;

pub async fn cmd_bank(config: Config, command: BankCommand) -> Result<()> {
  let bank = TemplateBank::open(config.bank).context("could not open the template bank")?;
  match command {
    BankCommand::Init => {
      println!(
        "Initialised template bank at {} ({} events)",
        bank.root().display(),
        bank.event_count()
      );
      Ok(())
    }
    BankCommand::Index => {
      let count = bank.update_index().context("could not rebuild the index")?;
      println!("Indexed {count} events");
      Ok(())
    }
    BankCommand::GetTemplates {
      latitude,
      longitude,
      radius,
      starttime,
      endtime,
    } => {
      let mut query = EventQuery::all();
      if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        query.region = Some(Region::new(latitude, longitude, radius));
      }
      if let Some(time) = starttime {
        query.starttime = Some(UtcTime::parse_rfc3339(&time).context("could not parse --starttime")?);
      }
      if let Some(time) = endtime {
        query.endtime = Some(UtcTime::parse_rfc3339(&time).context("could not parse --endtime")?);
      }

      let tribe = bank.get_templates(&query).await.context("could not load templates")?;
      if tribe.is_empty() {
        println!("No templates match");
        return Ok(());
      }
      println!("{:<28} {:>8} {:>8} {:>8}", "name", "channels", "stations", "length");
      for template in &tribe {
        println!(
          "{:<28} {:>8} {:>8} {:>7.0}s",
          template.name,
          template.channel_ids().len(),
          template.station_count(),
          template.process_length
        );
      }
      Ok(())
    }
  }
}
